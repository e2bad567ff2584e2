// ==========================================
// 校务管理后端 - 学生 API
// ==========================================
// 职责: 浏览课程/作业、作答提交、进度与成绩查询、缴费
// 提交流程: upsert 作答 → 进度重算 → 课程总评重算（重算步骤按配置重试）
// ==========================================

use crate::api::access::{AccessPolicy, Operation, Principal};
use crate::api::dto::{
    rounded_averages, AssignmentDetail, FeePaymentRequest, QuestionView, SubmissionResult,
};
use crate::api::error::{ApiError, ApiResult};
use crate::config::GradingConfig;
use crate::domain::{
    AnswerFeedback, AnswerSubmission, Assignment, Course, CourseAverage, CourseFeePayment,
    NewCourseFeePayment, OverallGrade, StudentProgress,
};
use crate::engine::{retry_with_limit, AnalyticsAggregator, GradeAggregator, ProgressCalculator};
use crate::repository::SchoolRepository;
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

/// 缴费最小金额
pub const MIN_FEE_AMOUNT: f64 = 0.01;

// ==========================================
// StudentApi
// ==========================================
pub struct StudentApi {
    repo: Arc<dyn SchoolRepository>,
    progress: ProgressCalculator,
    grades: GradeAggregator,
    analytics: AnalyticsAggregator,
    config: GradingConfig,
}

impl StudentApi {
    pub fn new(repo: Arc<dyn SchoolRepository>, config: GradingConfig) -> Self {
        Self {
            repo,
            progress: ProgressCalculator::new()
                .with_zero_progress_status(config.zero_progress_status),
            grades: GradeAggregator::new(),
            analytics: AnalyticsAggregator::new(),
            config,
        }
    }

    // ==========================================
    // 浏览
    // ==========================================

    /// 已发布课程（按开课日期升序）
    pub fn list_courses(&self, principal: &Principal) -> ApiResult<Vec<Course>> {
        AccessPolicy::authorize(principal, Operation::BrowseCourses)?;
        Ok(self.repo.list_courses(true)?)
    }

    /// 课程下已发布的作业（按截止时间升序）
    pub fn list_course_assignments(
        &self,
        principal: &Principal,
        course_id: i64,
    ) -> ApiResult<Vec<Assignment>> {
        AccessPolicy::authorize(principal, Operation::BrowseCourses)?;
        Ok(self.repo.list_assignments_by_course(course_id, true)?)
    }

    /// 查看已发布作业及题目（不含正确答案）
    pub fn show_assignment(
        &self,
        principal: &Principal,
        assignment_id: i64,
    ) -> ApiResult<AssignmentDetail> {
        AccessPolicy::authorize(principal, Operation::BrowseCourses)?;
        let assignment = self.published_assignment(assignment_id)?;
        let questions = self
            .repo
            .list_questions(assignment_id)?
            .into_iter()
            .map(QuestionView::from)
            .collect();
        Ok(AssignmentDetail {
            assignment,
            questions,
        })
    }

    // ==========================================
    // 作答
    // ==========================================

    /// 提交单题作答
    pub fn submit_answer(
        &self,
        principal: &Principal,
        assignment_id: i64,
        question_id: i64,
        chosen_answer: &str,
    ) -> ApiResult<SubmissionResult> {
        self.submit_all_answers(
            principal,
            assignment_id,
            &[AnswerSubmission {
                question_id,
                chosen_answer: chosen_answer.to_string(),
            }],
        )
    }

    /// 批量提交作答，随后重算进度与课程总评
    ///
    /// # 返回
    /// - Err(NotFound): 作业不存在或未发布
    /// - Err(Forbidden): 未选该课程
    /// - Err(ValidationError): 题目不属于该作业 / 答案为空
    pub fn submit_all_answers(
        &self,
        principal: &Principal,
        assignment_id: i64,
        answers: &[AnswerSubmission],
    ) -> ApiResult<SubmissionResult> {
        AccessPolicy::authorize(principal, Operation::SubmitAnswers)?;
        let student_id = principal.user_id;
        let assignment = self.published_assignment(assignment_id)?;
        self.require_enrolled(student_id, assignment.course_id)?;

        if answers.is_empty() {
            return Err(ApiError::ValidationError("answers 不能为空".to_string()));
        }
        let question_ids: Vec<i64> = self
            .repo
            .list_questions(assignment_id)?
            .iter()
            .map(|q| q.id)
            .collect();
        for answer in answers {
            if !question_ids.contains(&answer.question_id) {
                return Err(ApiError::ValidationError(format!(
                    "题目 {} 不属于作业 {}",
                    answer.question_id, assignment_id
                )));
            }
            if answer.chosen_answer.trim().is_empty() {
                return Err(ApiError::ValidationError(format!(
                    "题目 {} 的答案为空",
                    answer.question_id
                )));
            }
        }

        let now = Utc::now().naive_utc();
        let mut stored = Vec::with_capacity(answers.len());
        for answer in answers {
            stored.push(
                self.repo
                    .upsert_answer(student_id, assignment_id, answer, now)?,
            );
        }

        let (progress, overall_grade) = self.recompute(&assignment, student_id)?;
        tracing::info!(
            student_id,
            assignment_id,
            answers = stored.len(),
            progress = progress.progress_percentage,
            grade = overall_grade.grade,
            "作答已提交"
        );
        Ok(SubmissionResult {
            answers: stored,
            progress,
            overall_grade,
        })
    }

    // ==========================================
    // 进度 / 成绩
    // ==========================================

    /// 本人全部进度（更新时间倒序）
    pub fn view_progress(&self, principal: &Principal) -> ApiResult<Vec<StudentProgress>> {
        AccessPolicy::authorize(principal, Operation::ViewOwnProgress)?;
        Ok(self.repo.list_progress_by_student(principal.user_id)?)
    }

    /// 作业反馈（逐题得分与评语）
    pub fn assignment_feedback(
        &self,
        principal: &Principal,
        assignment_id: i64,
    ) -> ApiResult<Vec<AnswerFeedback>> {
        AccessPolicy::authorize(principal, Operation::ViewOwnGrades)?;
        let answers = self.repo.list_answers(assignment_id, principal.user_id)?;
        let mut feedback = Vec::with_capacity(answers.len());
        for answer in answers {
            let question = self
                .repo
                .find_question(answer.question_id)?
                .map(|q| q.question_text)
                .unwrap_or_default();
            feedback.push(AnswerFeedback {
                question_id: answer.question_id,
                question,
                chosen_answer: answer.chosen_answer,
                score: answer.score,
                feedback: answer.feedback,
                submitted_at: answer.submitted_at,
            });
        }
        Ok(feedback)
    }

    /// 进度图：按课程的平均进度
    pub fn progress_chart(&self, principal: &Principal) -> ApiResult<Vec<CourseAverage>> {
        AccessPolicy::authorize(principal, Operation::ViewOwnProgress)?;
        let rows = self
            .analytics
            .progress_by_course(&*self.repo, Some(principal.user_id))?;
        Ok(rounded_averages(rows, self.config.analytics_round_decimals))
    }

    /// 本人课程总评，可限定课程
    ///
    /// # 返回
    /// - Err(NotFound): 尚无课程总评
    pub fn overall_grade(
        &self,
        principal: &Principal,
        course_id: Option<i64>,
    ) -> ApiResult<OverallGrade> {
        AccessPolicy::authorize(principal, Operation::ViewOwnGrades)?;
        self.repo
            .list_grades_by_student(principal.user_id)?
            .into_iter()
            .find(|g| g.assignment_id.is_none() && course_id.map_or(true, |c| g.course_id == c))
            .ok_or_else(|| ApiError::NotFound("课程总评不存在".to_string()))
    }

    // ==========================================
    // 缴费
    // ==========================================

    /// 缴纳课程费用
    ///
    /// # 返回
    /// - Err(ValidationError): 金额小于 0.01
    /// - Err(Forbidden): 未选该课程
    /// - Err(Conflict): 交易号重复
    pub fn pay_course_fee(
        &self,
        principal: &Principal,
        course_id: i64,
        request: &FeePaymentRequest,
    ) -> ApiResult<CourseFeePayment> {
        AccessPolicy::authorize(principal, Operation::PayCourseFee)?;
        if !request.amount.is_finite() || request.amount < MIN_FEE_AMOUNT {
            return Err(ApiError::ValidationError(format!(
                "缴费金额必须不小于 {}",
                MIN_FEE_AMOUNT
            )));
        }
        if self.repo.find_course(course_id)?.is_none() {
            return Err(ApiError::NotFound(format!("Course(id={})不存在", course_id)));
        }
        self.require_enrolled(principal.user_id, course_id)?;

        let transaction_id = request
            .transaction_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let payment = NewCourseFeePayment {
            course_id,
            student_id: principal.user_id,
            amount: request.amount,
            payment_date: Utc::now().naive_utc(),
            payment_method: request.payment_method.clone(),
            transaction_id: Some(transaction_id),
            remarks: request.remarks.clone(),
        };
        let id = self.repo.insert_fee_payment(&payment)?;
        tracing::info!(
            payment_id = id,
            course_id,
            student_id = principal.user_id,
            amount = payment.amount,
            "学费已缴纳"
        );

        Ok(CourseFeePayment {
            id,
            course_id: payment.course_id,
            student_id: payment.student_id,
            amount: payment.amount,
            payment_date: payment.payment_date,
            payment_method: payment.payment_method,
            transaction_id: payment.transaction_id,
            remarks: payment.remarks,
        })
    }

    // ==========================================
    // 内部辅助
    // ==========================================

    fn published_assignment(&self, assignment_id: i64) -> ApiResult<Assignment> {
        self.repo
            .find_assignment(assignment_id)?
            .filter(|a| a.published)
            .ok_or_else(|| {
                ApiError::NotFound(format!("作业 {} 不存在或未发布", assignment_id))
            })
    }

    fn require_enrolled(&self, student_id: i64, course_id: i64) -> ApiResult<()> {
        if self.repo.is_enrolled(student_id, course_id)? {
            Ok(())
        } else {
            Err(ApiError::Forbidden(format!("未选修课程 {}", course_id)))
        }
    }

    fn recompute(
        &self,
        assignment: &Assignment,
        student_id: i64,
    ) -> ApiResult<(StudentProgress, OverallGrade)> {
        let repo = &*self.repo;
        let retries = self.config.recompute_max_retries;
        let progress = retry_with_limit("compute_assignment_progress", retries, || {
            self.progress
                .compute_assignment_progress(repo, assignment.id, student_id)
        })?;
        let grade = retry_with_limit("compute_overall_grade", retries, || {
            self.grades
                .compute_overall_grade(repo, assignment.course_id, student_id)
        })?;
        Ok((progress, grade))
    }
}
