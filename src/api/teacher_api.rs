// ==========================================
// 校务管理后端 - 教师 API
// ==========================================
// 职责: 作业与题目管理、评分、作业统计、成绩重算与导出、工资查询
// 红线: 只能操作本人布置的作业（Assignment.teacher_id）
// ==========================================

use crate::api::access::{AccessPolicy, Operation, Principal};
use crate::api::dto::{round_to, AssignmentPatch, GradeExportRow};
use crate::api::error::{ApiError, ApiResult};
use crate::config::GradingConfig;
use crate::domain::{
    Assignment, AssignmentProgress, AssignmentSummary, NewAssignment, NewQuestion, Question,
    StudentAnswer, TeacherSalary,
};
use crate::engine::{retry_with_limit, AnalyticsAggregator, GradeAggregator};
use crate::repository::SchoolRepository;
use std::collections::BTreeSet;
use std::sync::Arc;

const GRADE_EXPORT_HEADER: [&str; 6] = [
    "student_id",
    "student_name",
    "email",
    "grade",
    "letter_grade",
    "remarks",
];

// ==========================================
// TeacherApi
// ==========================================
pub struct TeacherApi {
    repo: Arc<dyn SchoolRepository>,
    grades: GradeAggregator,
    analytics: AnalyticsAggregator,
    config: GradingConfig,
}

impl TeacherApi {
    pub fn new(repo: Arc<dyn SchoolRepository>, config: GradingConfig) -> Self {
        Self {
            repo,
            grades: GradeAggregator::new(),
            analytics: AnalyticsAggregator::new(),
            config,
        }
    }

    // ==========================================
    // 作业管理
    // ==========================================

    /// 本人布置的作业
    pub fn list_assignments(&self, principal: &Principal) -> ApiResult<Vec<Assignment>> {
        AccessPolicy::authorize(principal, Operation::ManageAssignments)?;
        Ok(self.repo.list_assignments_by_teacher(principal.user_id)?)
    }

    /// 创建作业，随后重算已有课程总评的学生（新作业计入分母）
    ///
    /// # 返回
    /// - Err(ValidationError): 标题为空 / max_points < 1
    /// - Err(NotFound): 课程不存在
    /// - Err(Forbidden): 不是该课程的任课教师
    pub fn create_assignment(
        &self,
        principal: &Principal,
        assignment: &NewAssignment,
    ) -> ApiResult<Assignment> {
        AccessPolicy::authorize(principal, Operation::ManageAssignments)?;
        validate_assignment_fields(&assignment.title, assignment.max_points)?;

        let course = self.repo.find_course(assignment.course_id)?.ok_or_else(|| {
            ApiError::NotFound(format!("Course(id={})不存在", assignment.course_id))
        })?;
        if course.teacher_id != principal.user_id {
            return Err(ApiError::Forbidden(format!(
                "课程 {} 不由教师 {} 授课",
                course.id, principal.user_id
            )));
        }

        let id = self.repo.insert_assignment(principal.user_id, assignment)?;
        tracing::info!(assignment_id = id, course_id = course.id, "作业已创建");
        let created = self
            .repo
            .find_assignment(id)?
            .ok_or_else(|| ApiError::InternalError(format!("作业 {} 写入后未找到", id)))?;

        let students = self.affected_students(course.id, None)?;
        self.recompute_course_grades(course.id, students)?;
        Ok(created)
    }

    /// 更新作业（缺省字段保持不变）
    ///
    /// max_points 变化时重算该课程全部已有总评或已作答学生的课程总评
    pub fn update_assignment(
        &self,
        principal: &Principal,
        assignment_id: i64,
        patch: &AssignmentPatch,
    ) -> ApiResult<Assignment> {
        AccessPolicy::authorize(principal, Operation::ManageAssignments)?;
        let current = self.owned_assignment(principal, assignment_id)?;

        let updated = Assignment {
            title: patch.title.clone().unwrap_or_else(|| current.title.clone()),
            description: patch.description.clone().or_else(|| current.description.clone()),
            instructions: patch
                .instructions
                .clone()
                .or_else(|| current.instructions.clone()),
            due_date: patch.due_date.unwrap_or(current.due_date),
            max_points: patch.max_points.unwrap_or(current.max_points),
            published: patch.published.unwrap_or(current.published),
            ..current.clone()
        };
        validate_assignment_fields(&updated.title, updated.max_points)?;

        self.repo.update_assignment(&updated)?;
        tracing::info!(assignment_id, "作业已更新");

        if updated.max_points != current.max_points {
            let students = self.affected_students(updated.course_id, Some(assignment_id))?;
            self.recompute_course_grades(updated.course_id, students)?;
        }
        Ok(updated)
    }

    /// 删除作业（级联删除题目、作答及作业级进度/成绩）
    ///
    /// 删除后分母变化，重算该课程全部受影响学生的课程总评
    pub fn delete_assignment(&self, principal: &Principal, assignment_id: i64) -> ApiResult<()> {
        AccessPolicy::authorize(principal, Operation::ManageAssignments)?;
        let assignment = self.owned_assignment(principal, assignment_id)?;
        let students = self.affected_students(assignment.course_id, Some(assignment_id))?;

        self.repo.delete_assignment(assignment_id)?;
        tracing::info!(assignment_id, "作业已删除");

        self.recompute_course_grades(assignment.course_id, students)
    }

    /// 添加题目
    ///
    /// # 返回
    /// - Err(ValidationError): 题干为空 / points < 1 / 选项为空 / 正确答案不在选项中
    pub fn add_question(
        &self,
        principal: &Principal,
        assignment_id: i64,
        question: &NewQuestion,
    ) -> ApiResult<Question> {
        AccessPolicy::authorize(principal, Operation::ManageAssignments)?;
        self.owned_assignment(principal, assignment_id)?;

        if question.question_text.trim().is_empty() {
            return Err(ApiError::ValidationError("题干不能为空".to_string()));
        }
        if question.points < 1 {
            return Err(ApiError::ValidationError(format!(
                "points 必须 >= 1, 实际 {}",
                question.points
            )));
        }
        if question.options.is_empty() {
            return Err(ApiError::ValidationError("options 不能为空".to_string()));
        }
        if !question.options.contains_key(&question.correct_answer) {
            return Err(ApiError::ValidationError(format!(
                "正确答案 {} 不在选项中",
                question.correct_answer
            )));
        }

        let id = self.repo.insert_question(assignment_id, question)?;
        tracing::info!(question_id = id, assignment_id, "题目已添加");
        self.repo
            .find_question(id)?
            .ok_or_else(|| ApiError::InternalError(format!("题目 {} 写入后未找到", id)))
    }

    // ==========================================
    // 评分
    // ==========================================

    /// 评分并写入评语，随后重算该学生的课程总评
    ///
    /// # 返回
    /// - Err(ValidationError): score 不在 [0, question.points]
    pub fn score_answer(
        &self,
        principal: &Principal,
        answer_id: i64,
        score: i64,
        feedback: Option<&str>,
    ) -> ApiResult<StudentAnswer> {
        AccessPolicy::authorize(principal, Operation::ScoreAnswers)?;
        let answer = self
            .repo
            .find_answer_by_id(answer_id)?
            .ok_or_else(|| ApiError::NotFound(format!("StudentAnswer(id={})不存在", answer_id)))?;
        let assignment = self.owned_assignment(principal, answer.assignment_id)?;
        let question = self.repo.find_question(answer.question_id)?.ok_or_else(|| {
            ApiError::NotFound(format!("Question(id={})不存在", answer.question_id))
        })?;

        if score < 0 || score > question.points {
            return Err(ApiError::ValidationError(format!(
                "score 必须在 [0, {}] 内, 实际 {}",
                question.points, score
            )));
        }

        self.repo.set_answer_score(answer_id, score, feedback)?;
        tracing::info!(answer_id, score, "作答已评分");
        self.recompute_course_grade(assignment.course_id, answer.student_id)?;

        self.repo
            .find_answer_by_id(answer_id)?
            .ok_or_else(|| ApiError::NotFound(format!("StudentAnswer(id={})不存在", answer_id)))
    }

    // ==========================================
    // 统计 / 成绩
    // ==========================================

    /// 作业作答统计
    pub fn assignment_analytics(
        &self,
        principal: &Principal,
        assignment_id: i64,
    ) -> ApiResult<AssignmentSummary> {
        AccessPolicy::authorize(principal, Operation::ViewAssignmentAnalytics)?;
        self.owned_assignment(principal, assignment_id)?;
        let summary = self
            .analytics
            .assignment_summary(&*self.repo, assignment_id)?;
        Ok(AssignmentSummary {
            average_score: round_to(summary.average_score, self.config.analytics_round_decimals),
            ..summary
        })
    }

    /// 本人各作业的平均进度与作答数（按截止时间升序）
    pub fn my_assignments_progress(
        &self,
        principal: &Principal,
    ) -> ApiResult<Vec<AssignmentProgress>> {
        AccessPolicy::authorize(principal, Operation::ViewAssignmentAnalytics)?;
        let decimals = self.config.analytics_round_decimals;
        let rows = self
            .analytics
            .assignment_progress_by_teacher(&*self.repo, principal.user_id)?;
        Ok(rows
            .into_iter()
            .map(|row| AssignmentProgress {
                avg_progress: round_to(row.avg_progress, decimals),
                ..row
            })
            .collect())
    }

    /// 重算作业级成绩
    ///
    /// # 返回
    /// - 重算的学生数
    pub fn recalculate_grades(&self, principal: &Principal, assignment_id: i64) -> ApiResult<usize> {
        AccessPolicy::authorize(principal, Operation::RecalculateGrades)?;
        self.owned_assignment(principal, assignment_id)?;
        let repo = &*self.repo;
        let count = retry_with_limit(
            "recalculate_assignment_grades",
            self.config.recompute_max_retries,
            || self.grades.recalculate_assignment_grades(repo, assignment_id),
        )?;
        Ok(count)
    }

    /// 导出作业级成绩（按学生 id 升序）
    pub fn export_grades(
        &self,
        principal: &Principal,
        assignment_id: i64,
    ) -> ApiResult<Vec<GradeExportRow>> {
        AccessPolicy::authorize(principal, Operation::ExportGrades)?;
        self.owned_assignment(principal, assignment_id)?;

        let decimals = self.config.analytics_round_decimals;
        let mut rows = Vec::new();
        for grade in self.repo.list_grades_by_assignment(assignment_id)? {
            let Some(student) = self.repo.find_user(grade.student_id)? else {
                tracing::warn!(student_id = grade.student_id, "成绩对应的学生不存在，跳过");
                continue;
            };
            rows.push(GradeExportRow {
                student_id: student.id,
                student_name: student.name,
                email: student.email,
                grade: round_to(grade.grade, decimals),
                letter_grade: grade.letter_grade,
                remarks: grade.remarks,
            });
        }
        Ok(rows)
    }

    /// 导出作业级成绩为 CSV 文本（含表头，无成绩时只有表头）
    pub fn export_grades_csv(&self, principal: &Principal, assignment_id: i64) -> ApiResult<String> {
        let rows = self.export_grades(principal, assignment_id)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        writer
            .write_record(GRADE_EXPORT_HEADER)
            .map_err(|e| ApiError::InternalError(format!("CSV 写入失败: {}", e)))?;
        for row in &rows {
            writer
                .serialize(row)
                .map_err(|e| ApiError::InternalError(format!("CSV 写入失败: {}", e)))?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| ApiError::InternalError(format!("CSV 写入失败: {}", e)))?;
        String::from_utf8(bytes).map_err(|e| ApiError::InternalError(e.to_string()))
    }

    /// 本人工资记录
    pub fn my_salaries(&self, principal: &Principal) -> ApiResult<Vec<TeacherSalary>> {
        AccessPolicy::authorize(principal, Operation::ViewOwnSalary)?;
        Ok(self.repo.list_salaries(Some(principal.user_id))?)
    }

    // ==========================================
    // 内部辅助
    // ==========================================

    fn owned_assignment(&self, principal: &Principal, assignment_id: i64) -> ApiResult<Assignment> {
        let assignment = self.repo.find_assignment(assignment_id)?.ok_or_else(|| {
            ApiError::NotFound(format!("Assignment(id={})不存在", assignment_id))
        })?;
        if assignment.teacher_id != principal.user_id {
            return Err(ApiError::Forbidden(format!(
                "作业 {} 不属于教师 {}",
                assignment_id, principal.user_id
            )));
        }
        Ok(assignment)
    }

    /// 课程总评随作业集合变化的学生: 已有课程总评的 + 该作业的作答者
    fn affected_students(
        &self,
        course_id: i64,
        assignment_id: Option<i64>,
    ) -> ApiResult<BTreeSet<i64>> {
        let mut students: BTreeSet<i64> = self
            .repo
            .list_course_graded_students(course_id)?
            .into_iter()
            .collect();
        if let Some(assignment_id) = assignment_id {
            students.extend(self.repo.list_answering_students(assignment_id)?);
        }
        Ok(students)
    }

    fn recompute_course_grades(&self, course_id: i64, students: BTreeSet<i64>) -> ApiResult<()> {
        let count = students.len();
        for student_id in students {
            self.recompute_course_grade(course_id, student_id)?;
        }
        if count > 0 {
            tracing::info!(course_id, count, "课程总评已重算");
        }
        Ok(())
    }

    fn recompute_course_grade(&self, course_id: i64, student_id: i64) -> ApiResult<()> {
        let repo = &*self.repo;
        retry_with_limit(
            "compute_overall_grade",
            self.config.recompute_max_retries,
            || self.grades.compute_overall_grade(repo, course_id, student_id),
        )?;
        Ok(())
    }
}

fn validate_assignment_fields(title: &str, max_points: i64) -> ApiResult<()> {
    if title.trim().is_empty() {
        return Err(ApiError::ValidationError("作业标题不能为空".to_string()));
    }
    if max_points < 1 {
        return Err(ApiError::ValidationError(format!(
            "max_points 必须 >= 1, 实际 {}",
            max_points
        )));
    }
    Ok(())
}
