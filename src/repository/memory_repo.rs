// ==========================================
// 校务管理后端 - 内存仓储实现
// ==========================================
// 用途: 引擎单元测试 / 无数据库场景
// 行为与 SqliteSchoolRepository 对齐:
// - 外键检查（引用不存在 → ForeignKeyViolation）
// - 唯一约束（email / transaction_id → UniqueConstraintViolation）
// - 级联删除顺序与"仍在授课则拒绝删除"
// 故障注入: inject_faults 让后续 N 次仓储调用失败
// ==========================================

use crate::domain::{
    AggregateStat, AnswerSubmission, Assignment, Classroom, Course, CourseFeePayment, GroupField,
    MetricSample, NewAssignment, NewCourse, NewCourseFeePayment, NewQuestion, NewTeacherSalary,
    NewUser, OverallGrade, Question, Role, SalaryStatus, StudentAnswer, StudentProgress,
    TeacherSalary, User,
};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::school_repo::{
    CourseworkRepository, GradebookRepository, LedgerRepository,
};
use chrono::{NaiveDateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

/// 注入的故障类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFault {
    /// 瞬时故障（等价于 SQLITE_BUSY）
    Busy,
    /// 唯一约束冲突（等价于并发 upsert 竞争）
    Conflict,
}

impl InjectedFault {
    fn into_error(self) -> RepositoryError {
        match self {
            InjectedFault::Busy => RepositoryError::DatabaseBusy("injected fault".to_string()),
            InjectedFault::Conflict => {
                RepositoryError::UniqueConstraintViolation("injected fault".to_string())
            }
        }
    }
}

#[derive(Default)]
struct MemoryState {
    next_id: i64,
    users: BTreeMap<i64, User>,
    classrooms: BTreeMap<i64, Classroom>,
    courses: BTreeMap<i64, Course>,
    enrollments: BTreeSet<(i64, i64)>, // (student_id, course_id)
    assignments: BTreeMap<i64, Assignment>,
    questions: BTreeMap<i64, Question>,
    answers: BTreeMap<i64, StudentAnswer>,
    progress: Vec<StudentProgress>,
    grades: Vec<OverallGrade>,
    salaries: BTreeMap<i64, TeacherSalary>,
    payments: BTreeMap<i64, CourseFeePayment>,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn require<T>(map: &BTreeMap<i64, T>, id: i64, what: &str) -> RepositoryResult<()> {
        if map.contains_key(&id) {
            Ok(())
        } else {
            Err(RepositoryError::ForeignKeyViolation(format!(
                "FOREIGN KEY constraint failed: {}={}",
                what, id
            )))
        }
    }

    fn remove_assignment_rows(&mut self, assignment_id: i64) -> bool {
        self.answers.retain(|_, a| a.assignment_id != assignment_id);
        self.progress
            .retain(|p| p.assignment_id != Some(assignment_id));
        self.grades.retain(|g| g.assignment_id != Some(assignment_id));
        self.questions.retain(|_, q| q.assignment_id != assignment_id);
        self.assignments.remove(&assignment_id).is_some()
    }

    fn answers_of(
        &self,
        assignment_id: i64,
        student_id: i64,
    ) -> impl Iterator<Item = &StudentAnswer> {
        self.answers
            .values()
            .filter(move |a| a.assignment_id == assignment_id && a.student_id == student_id)
    }
}

fn stats_grouped<I>(rows: I) -> Vec<(i64, AggregateStat)>
where
    I: IntoIterator<Item = (i64, f64)>,
{
    let mut grouped: BTreeMap<i64, AggregateStat> = BTreeMap::new();
    for (key, value) in rows {
        grouped.entry(key).or_default().push(value);
    }
    grouped.into_iter().collect()
}

fn unsupported_group(group: GroupField) -> RepositoryError {
    RepositoryError::ValidationError(format!("不支持的分组字段: {:?}", group))
}

// ==========================================
// InMemorySchoolRepository
// ==========================================
#[derive(Default)]
pub struct InMemorySchoolRepository {
    state: Mutex<MemoryState>,
    faults: Mutex<VecDeque<InjectedFault>>,
}

impl InMemorySchoolRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 让接下来的 `times` 次仓储调用以 `fault` 失败
    pub fn inject_faults(&self, fault: InjectedFault, times: usize) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.extend(std::iter::repeat(fault).take(times));
        }
    }

    /// 尚未消耗的注入故障数
    pub fn pending_faults(&self) -> usize {
        self.faults.lock().map(|f| f.len()).unwrap_or(0)
    }

    /// 直接写入总评（测试用，可指定 created_at）
    pub fn insert_grade_raw(&self, grade: OverallGrade) -> RepositoryResult<()> {
        let mut state = self.state()?;
        state.grades.push(grade);
        Ok(())
    }

    fn state(&self) -> RepositoryResult<MutexGuard<'_, MemoryState>> {
        let fault = self
            .faults
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?
            .pop_front();
        if let Some(fault) = fault {
            return Err(fault.into_error());
        }
        self.state
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }
}

impl CourseworkRepository for InMemorySchoolRepository {
    fn insert_user(&self, user: &NewUser) -> RepositoryResult<i64> {
        let mut state = self.state()?;
        if state.users.values().any(|u| u.email == user.email) {
            return Err(RepositoryError::UniqueConstraintViolation(format!(
                "UNIQUE constraint failed: users.email={}",
                user.email
            )));
        }
        let id = state.next_id();
        state.users.insert(
            id,
            User {
                id,
                name: user.name.clone(),
                email: user.email.clone(),
                role: user.role,
                created_at: Utc::now().naive_utc(),
            },
        );
        Ok(id)
    }

    fn find_user(&self, user_id: i64) -> RepositoryResult<Option<User>> {
        Ok(self.state()?.users.get(&user_id).cloned())
    }

    fn list_users_by_role(&self, role: Role) -> RepositoryResult<Vec<User>> {
        let state = self.state()?;
        let mut users: Vec<User> = state
            .users
            .values()
            .filter(|u| u.role == role)
            .cloned()
            .collect();
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(users)
    }

    fn count_users(&self) -> RepositoryResult<u64> {
        Ok(self.state()?.users.len() as u64)
    }

    fn count_users_by_role(&self, role: Role) -> RepositoryResult<u64> {
        let state = self.state()?;
        Ok(state.users.values().filter(|u| u.role == role).count() as u64)
    }

    fn update_user(&self, user: &User) -> RepositoryResult<bool> {
        let mut state = self.state()?;
        if state
            .users
            .values()
            .any(|u| u.id != user.id && u.email == user.email)
        {
            return Err(RepositoryError::UniqueConstraintViolation(format!(
                "UNIQUE constraint failed: users.email={}",
                user.email
            )));
        }
        match state.users.get_mut(&user.id) {
            Some(existing) => {
                let created_at = existing.created_at;
                *existing = User {
                    created_at,
                    ..user.clone()
                };
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete_user(&self, user_id: i64) -> RepositoryResult<bool> {
        let mut state = self.state()?;
        if !state.users.contains_key(&user_id) {
            return Ok(false);
        }
        let still_teaching = state.courses.values().any(|c| c.teacher_id == user_id)
            || state.assignments.values().any(|a| a.teacher_id == user_id);
        if still_teaching {
            return Err(RepositoryError::ForeignKeyViolation(format!(
                "FOREIGN KEY constraint failed: users.id={} 仍被课程引用",
                user_id
            )));
        }
        state.answers.retain(|_, a| a.student_id != user_id);
        state.progress.retain(|p| p.student_id != user_id);
        state.grades.retain(|g| g.student_id != user_id);
        state.enrollments.retain(|(s, _)| *s != user_id);
        state.payments.retain(|_, p| p.student_id != user_id);
        state.salaries.retain(|_, s| s.teacher_id != user_id);
        state.users.remove(&user_id);
        Ok(true)
    }

    fn insert_classroom(&self, name: &str) -> RepositoryResult<i64> {
        let mut state = self.state()?;
        let id = state.next_id();
        state.classrooms.insert(
            id,
            Classroom {
                id,
                name: name.to_string(),
            },
        );
        Ok(id)
    }

    fn find_classroom(&self, classroom_id: i64) -> RepositoryResult<Option<Classroom>> {
        Ok(self.state()?.classrooms.get(&classroom_id).cloned())
    }

    fn insert_course(&self, course: &NewCourse) -> RepositoryResult<i64> {
        let mut state = self.state()?;
        MemoryState::require(&state.users, course.teacher_id, "courses.teacher_id")?;
        MemoryState::require(&state.classrooms, course.classroom_id, "courses.classroom_id")?;
        let id = state.next_id();
        state.courses.insert(
            id,
            Course {
                id,
                title: course.title.clone(),
                description: course.description.clone(),
                teacher_id: course.teacher_id,
                classroom_id: course.classroom_id,
                fee: course.fee,
                start_date: course.start_date,
                end_date: course.end_date,
                published: course.published,
            },
        );
        Ok(id)
    }

    fn find_course(&self, course_id: i64) -> RepositoryResult<Option<Course>> {
        Ok(self.state()?.courses.get(&course_id).cloned())
    }

    fn update_course(&self, course: &Course) -> RepositoryResult<bool> {
        let mut state = self.state()?;
        MemoryState::require(&state.users, course.teacher_id, "courses.teacher_id")?;
        MemoryState::require(&state.classrooms, course.classroom_id, "courses.classroom_id")?;
        match state.courses.get_mut(&course.id) {
            Some(existing) => {
                *existing = course.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn list_courses(&self, published_only: bool) -> RepositoryResult<Vec<Course>> {
        let state = self.state()?;
        let mut courses: Vec<Course> = state
            .courses
            .values()
            .filter(|c| !published_only || c.published)
            .cloned()
            .collect();
        courses.sort_by(|a, b| a.start_date.cmp(&b.start_date).then(a.id.cmp(&b.id)));
        Ok(courses)
    }

    fn count_courses(&self) -> RepositoryResult<u64> {
        Ok(self.state()?.courses.len() as u64)
    }

    fn delete_course(&self, course_id: i64) -> RepositoryResult<bool> {
        let mut state = self.state()?;
        let assignment_ids: Vec<i64> = state
            .assignments
            .values()
            .filter(|a| a.course_id == course_id)
            .map(|a| a.id)
            .collect();
        for assignment_id in assignment_ids {
            state.remove_assignment_rows(assignment_id);
        }
        state.progress.retain(|p| p.course_id != Some(course_id));
        state.grades.retain(|g| g.course_id != course_id);
        state.enrollments.retain(|(_, c)| *c != course_id);
        state.payments.retain(|_, p| p.course_id != course_id);
        Ok(state.courses.remove(&course_id).is_some())
    }

    fn enroll_student(&self, student_id: i64, course_id: i64) -> RepositoryResult<()> {
        let mut state = self.state()?;
        MemoryState::require(&state.users, student_id, "course_student.student_id")?;
        MemoryState::require(&state.courses, course_id, "course_student.course_id")?;
        state.enrollments.insert((student_id, course_id));
        Ok(())
    }

    fn is_enrolled(&self, student_id: i64, course_id: i64) -> RepositoryResult<bool> {
        Ok(self.state()?.enrollments.contains(&(student_id, course_id)))
    }

    fn insert_assignment(
        &self,
        teacher_id: i64,
        assignment: &NewAssignment,
    ) -> RepositoryResult<i64> {
        let mut state = self.state()?;
        MemoryState::require(&state.courses, assignment.course_id, "assignments.course_id")?;
        MemoryState::require(&state.users, teacher_id, "assignments.teacher_id")?;
        let id = state.next_id();
        state.assignments.insert(
            id,
            Assignment {
                id,
                course_id: assignment.course_id,
                teacher_id,
                title: assignment.title.clone(),
                description: assignment.description.clone(),
                instructions: assignment.instructions.clone(),
                due_date: assignment.due_date,
                max_points: assignment.max_points,
                published: assignment.published,
            },
        );
        Ok(id)
    }

    fn update_assignment(&self, assignment: &Assignment) -> RepositoryResult<bool> {
        let mut state = self.state()?;
        MemoryState::require(&state.courses, assignment.course_id, "assignments.course_id")?;
        match state.assignments.get_mut(&assignment.id) {
            Some(existing) => {
                let teacher_id = existing.teacher_id;
                *existing = Assignment {
                    teacher_id,
                    ..assignment.clone()
                };
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn find_assignment(&self, assignment_id: i64) -> RepositoryResult<Option<Assignment>> {
        Ok(self.state()?.assignments.get(&assignment_id).cloned())
    }

    fn list_assignments_by_course(
        &self,
        course_id: i64,
        published_only: bool,
    ) -> RepositoryResult<Vec<Assignment>> {
        let state = self.state()?;
        let mut assignments: Vec<Assignment> = state
            .assignments
            .values()
            .filter(|a| a.course_id == course_id && (!published_only || a.published))
            .cloned()
            .collect();
        assignments.sort_by(|a, b| a.due_date.cmp(&b.due_date).then(a.id.cmp(&b.id)));
        Ok(assignments)
    }

    fn list_assignments_by_teacher(&self, teacher_id: i64) -> RepositoryResult<Vec<Assignment>> {
        let state = self.state()?;
        let mut assignments: Vec<Assignment> = state
            .assignments
            .values()
            .filter(|a| a.teacher_id == teacher_id)
            .cloned()
            .collect();
        assignments.sort_by(|a, b| a.due_date.cmp(&b.due_date).then(a.id.cmp(&b.id)));
        Ok(assignments)
    }

    fn count_assignments(&self) -> RepositoryResult<u64> {
        Ok(self.state()?.assignments.len() as u64)
    }

    fn delete_assignment(&self, assignment_id: i64) -> RepositoryResult<bool> {
        let mut state = self.state()?;
        Ok(state.remove_assignment_rows(assignment_id))
    }

    fn insert_question(
        &self,
        assignment_id: i64,
        question: &NewQuestion,
    ) -> RepositoryResult<i64> {
        let mut state = self.state()?;
        MemoryState::require(&state.assignments, assignment_id, "questions.assignment_id")?;
        let id = state.next_id();
        state.questions.insert(
            id,
            Question {
                id,
                assignment_id,
                question_text: question.question_text.clone(),
                options: question.options.clone(),
                correct_answer: question.correct_answer.clone(),
                points: question.points,
            },
        );
        Ok(id)
    }

    fn find_question(&self, question_id: i64) -> RepositoryResult<Option<Question>> {
        Ok(self.state()?.questions.get(&question_id).cloned())
    }

    fn list_questions(&self, assignment_id: i64) -> RepositoryResult<Vec<Question>> {
        let state = self.state()?;
        Ok(state
            .questions
            .values()
            .filter(|q| q.assignment_id == assignment_id)
            .cloned()
            .collect())
    }

    fn count_questions(&self, assignment_id: i64) -> RepositoryResult<u64> {
        let state = self.state()?;
        Ok(state
            .questions
            .values()
            .filter(|q| q.assignment_id == assignment_id)
            .count() as u64)
    }

    fn upsert_answer(
        &self,
        student_id: i64,
        assignment_id: i64,
        submission: &AnswerSubmission,
        submitted_at: NaiveDateTime,
    ) -> RepositoryResult<StudentAnswer> {
        let mut state = self.state()?;
        MemoryState::require(&state.users, student_id, "student_answers.student_id")?;
        MemoryState::require(&state.assignments, assignment_id, "student_answers.assignment_id")?;
        MemoryState::require(
            &state.questions,
            submission.question_id,
            "student_answers.question_id",
        )?;

        let existing = state
            .answers
            .values_mut()
            .find(|a| {
                a.student_id == student_id
                    && a.assignment_id == assignment_id
                    && a.question_id == submission.question_id
            });
        if let Some(answer) = existing {
            answer.chosen_answer = submission.chosen_answer.clone();
            answer.submitted_at = submitted_at;
            return Ok(answer.clone());
        }

        let id = state.next_id();
        let answer = StudentAnswer {
            id,
            student_id,
            assignment_id,
            question_id: submission.question_id,
            chosen_answer: submission.chosen_answer.clone(),
            score: None,
            feedback: None,
            submitted_at,
        };
        state.answers.insert(id, answer.clone());
        Ok(answer)
    }

    fn find_answer(
        &self,
        student_id: i64,
        assignment_id: i64,
        question_id: i64,
    ) -> RepositoryResult<Option<StudentAnswer>> {
        let state = self.state()?;
        let found = state
            .answers_of(assignment_id, student_id)
            .find(|a| a.question_id == question_id)
            .cloned();
        Ok(found)
    }

    fn list_answers(
        &self,
        assignment_id: i64,
        student_id: i64,
    ) -> RepositoryResult<Vec<StudentAnswer>> {
        let state = self.state()?;
        let mut answers: Vec<StudentAnswer> =
            state.answers_of(assignment_id, student_id).cloned().collect();
        answers.sort_by_key(|a| a.question_id);
        Ok(answers)
    }

    fn count_answered_questions(
        &self,
        assignment_id: i64,
        student_id: i64,
    ) -> RepositoryResult<u64> {
        let state = self.state()?;
        let distinct: BTreeSet<i64> = state
            .answers_of(assignment_id, student_id)
            .map(|a| a.question_id)
            .collect();
        Ok(distinct.len() as u64)
    }

    fn sum_answer_scores(&self, assignment_id: i64, student_id: i64) -> RepositoryResult<i64> {
        let state = self.state()?;
        Ok(state
            .answers_of(assignment_id, student_id)
            .filter_map(|a| a.score)
            .sum())
    }

    fn set_answer_score(
        &self,
        answer_id: i64,
        score: i64,
        feedback: Option<&str>,
    ) -> RepositoryResult<bool> {
        let mut state = self.state()?;
        match state.answers.get_mut(&answer_id) {
            Some(answer) => {
                answer.score = Some(score);
                answer.feedback = feedback.map(str::to_string);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn find_answer_by_id(&self, answer_id: i64) -> RepositoryResult<Option<StudentAnswer>> {
        Ok(self.state()?.answers.get(&answer_id).cloned())
    }

    fn answer_score_stat(&self, assignment_id: i64) -> RepositoryResult<(u64, AggregateStat)> {
        let state = self.state()?;
        let mut rows = 0u64;
        let mut stat = AggregateStat::default();
        for answer in state.answers.values().filter(|a| a.assignment_id == assignment_id) {
            rows += 1;
            if let Some(score) = answer.score {
                stat.push(score as f64);
            }
        }
        Ok((rows, stat))
    }

    fn list_answering_students(&self, assignment_id: i64) -> RepositoryResult<Vec<i64>> {
        let state = self.state()?;
        let ids: BTreeSet<i64> = state
            .answers
            .values()
            .filter(|a| a.assignment_id == assignment_id)
            .map(|a| a.student_id)
            .collect();
        Ok(ids.into_iter().collect())
    }
}

impl GradebookRepository for InMemorySchoolRepository {
    fn upsert_progress(&self, progress: &StudentProgress) -> RepositoryResult<StudentProgress> {
        let mut state = self.state()?;
        MemoryState::require(&state.users, progress.student_id, "student_progress.student_id")?;
        if let Some(assignment_id) = progress.assignment_id {
            MemoryState::require(
                &state.assignments,
                assignment_id,
                "student_progress.assignment_id",
            )?;
        }

        let same_key = |p: &StudentProgress| {
            p.student_id == progress.student_id
                && match progress.assignment_id {
                    Some(assignment_id) => p.assignment_id == Some(assignment_id),
                    None => p.assignment_id.is_none() && p.course_id == progress.course_id,
                }
        };
        match state.progress.iter().position(same_key) {
            Some(idx) => state.progress[idx] = progress.clone(),
            None => state.progress.push(progress.clone()),
        }
        Ok(progress.clone())
    }

    fn find_progress(
        &self,
        student_id: i64,
        assignment_id: i64,
    ) -> RepositoryResult<Option<StudentProgress>> {
        let state = self.state()?;
        Ok(state
            .progress
            .iter()
            .find(|p| p.student_id == student_id && p.assignment_id == Some(assignment_id))
            .cloned())
    }

    fn list_progress_by_student(&self, student_id: i64) -> RepositoryResult<Vec<StudentProgress>> {
        let state = self.state()?;
        let mut rows: Vec<StudentProgress> = state
            .progress
            .iter()
            .filter(|p| p.student_id == student_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(rows)
    }

    fn upsert_grade(&self, grade: &OverallGrade) -> RepositoryResult<OverallGrade> {
        let mut state = self.state()?;
        MemoryState::require(&state.users, grade.student_id, "overall_grades.student_id")?;
        MemoryState::require(&state.courses, grade.course_id, "overall_grades.course_id")?;

        let existing = state.grades.iter().position(|g| {
            g.student_id == grade.student_id
                && g.course_id == grade.course_id
                && g.assignment_id == grade.assignment_id
        });
        match existing {
            Some(idx) => {
                let stored = OverallGrade {
                    created_at: state.grades[idx].created_at,
                    ..grade.clone()
                };
                state.grades[idx] = stored.clone();
                Ok(stored)
            }
            None => {
                state.grades.push(grade.clone());
                Ok(grade.clone())
            }
        }
    }

    fn find_grade(
        &self,
        student_id: i64,
        course_id: i64,
        assignment_id: Option<i64>,
    ) -> RepositoryResult<Option<OverallGrade>> {
        let state = self.state()?;
        Ok(state
            .grades
            .iter()
            .find(|g| {
                g.student_id == student_id
                    && g.course_id == course_id
                    && g.assignment_id == assignment_id
            })
            .cloned())
    }

    fn list_grades_by_student(&self, student_id: i64) -> RepositoryResult<Vec<OverallGrade>> {
        let state = self.state()?;
        let mut rows: Vec<OverallGrade> = state
            .grades
            .iter()
            .filter(|g| g.student_id == student_id)
            .cloned()
            .collect();
        rows.sort_by_key(|g| (g.course_id, g.assignment_id));
        Ok(rows)
    }

    fn list_course_graded_students(&self, course_id: i64) -> RepositoryResult<Vec<i64>> {
        let state = self.state()?;
        let ids: BTreeSet<i64> = state
            .grades
            .iter()
            .filter(|g| g.course_id == course_id && g.assignment_id.is_none())
            .map(|g| g.student_id)
            .collect();
        Ok(ids.into_iter().collect())
    }

    fn list_grades_by_assignment(&self, assignment_id: i64) -> RepositoryResult<Vec<OverallGrade>> {
        let state = self.state()?;
        let mut rows: Vec<OverallGrade> = state
            .grades
            .iter()
            .filter(|g| g.assignment_id == Some(assignment_id))
            .cloned()
            .collect();
        rows.sort_by_key(|g| g.student_id);
        Ok(rows)
    }

    fn grade_stat(&self) -> RepositoryResult<AggregateStat> {
        let state = self.state()?;
        let mut stat = AggregateStat::default();
        state.grades.iter().for_each(|g| stat.push(g.grade));
        Ok(stat)
    }

    fn progress_stat(&self) -> RepositoryResult<AggregateStat> {
        let state = self.state()?;
        let mut stat = AggregateStat::default();
        state
            .progress
            .iter()
            .for_each(|p| stat.push(p.progress_percentage));
        Ok(stat)
    }

    fn progress_stat_by_assignment(&self, assignment_id: i64) -> RepositoryResult<AggregateStat> {
        let state = self.state()?;
        let mut stat = AggregateStat::default();
        state
            .progress
            .iter()
            .filter(|p| p.assignment_id == Some(assignment_id))
            .for_each(|p| stat.push(p.progress_percentage));
        Ok(stat)
    }

    fn grade_stats_by_course(&self) -> RepositoryResult<Vec<(i64, AggregateStat)>> {
        let state = self.state()?;
        Ok(stats_grouped(
            state.grades.iter().map(|g| (g.course_id, g.grade)),
        ))
    }

    fn progress_stats_by_course(
        &self,
        student_id: Option<i64>,
    ) -> RepositoryResult<Vec<(i64, AggregateStat)>> {
        let state = self.state()?;
        Ok(stats_grouped(
            state
                .progress
                .iter()
                .filter(|p| student_id.map_or(true, |s| p.student_id == s))
                .filter_map(|p| p.course_id.map(|c| (c, p.progress_percentage))),
        ))
    }

    fn grade_samples(&self, group_by: Option<GroupField>) -> RepositoryResult<Vec<MetricSample>> {
        if let Some(GroupField::Teacher) = group_by {
            return Err(unsupported_group(GroupField::Teacher));
        }
        let state = self.state()?;
        Ok(state
            .grades
            .iter()
            .map(|g| MetricSample {
                date: g.created_at.date(),
                value: g.grade,
                group_key: match group_by {
                    Some(GroupField::Course) => Some(g.course_id),
                    Some(GroupField::Student) => Some(g.student_id),
                    _ => None,
                },
            })
            .collect())
    }
}

impl LedgerRepository for InMemorySchoolRepository {
    fn insert_salary(&self, salary: &NewTeacherSalary) -> RepositoryResult<i64> {
        let mut state = self.state()?;
        MemoryState::require(&state.users, salary.teacher_id, "teacher_salaries.teacher_id")?;
        let id = state.next_id();
        state.salaries.insert(
            id,
            TeacherSalary {
                id,
                teacher_id: salary.teacher_id,
                salary_amount: salary.salary_amount,
                pay_date: salary.pay_date,
                status: salary.status,
                remarks: salary.remarks.clone(),
            },
        );
        Ok(id)
    }

    fn list_salaries(&self, teacher_id: Option<i64>) -> RepositoryResult<Vec<TeacherSalary>> {
        let state = self.state()?;
        let mut rows: Vec<TeacherSalary> = state
            .salaries
            .values()
            .filter(|s| teacher_id.map_or(true, |t| s.teacher_id == t))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.pay_date.cmp(&a.pay_date).then(b.id.cmp(&a.id)));
        Ok(rows)
    }

    fn salary_stat(
        &self,
        status: Option<SalaryStatus>,
        teacher_id: Option<i64>,
    ) -> RepositoryResult<AggregateStat> {
        let state = self.state()?;
        let mut stat = AggregateStat::default();
        state
            .salaries
            .values()
            .filter(|s| status.map_or(true, |st| s.status == st))
            .filter(|s| teacher_id.map_or(true, |t| s.teacher_id == t))
            .for_each(|s| stat.push(s.salary_amount));
        Ok(stat)
    }

    fn insert_fee_payment(&self, payment: &NewCourseFeePayment) -> RepositoryResult<i64> {
        let mut state = self.state()?;
        MemoryState::require(&state.courses, payment.course_id, "course_fee_payments.course_id")?;
        MemoryState::require(&state.users, payment.student_id, "course_fee_payments.student_id")?;
        if let Some(tx_id) = &payment.transaction_id {
            if state
                .payments
                .values()
                .any(|p| p.transaction_id.as_ref() == Some(tx_id))
            {
                return Err(RepositoryError::UniqueConstraintViolation(format!(
                    "UNIQUE constraint failed: course_fee_payments.transaction_id={}",
                    tx_id
                )));
            }
        }
        let id = state.next_id();
        state.payments.insert(
            id,
            CourseFeePayment {
                id,
                course_id: payment.course_id,
                student_id: payment.student_id,
                amount: payment.amount,
                payment_date: payment.payment_date,
                payment_method: payment.payment_method.clone(),
                transaction_id: payment.transaction_id.clone(),
                remarks: payment.remarks.clone(),
            },
        );
        Ok(id)
    }

    fn list_fee_payments(&self, student_id: Option<i64>) -> RepositoryResult<Vec<CourseFeePayment>> {
        let state = self.state()?;
        let mut rows: Vec<CourseFeePayment> = state
            .payments
            .values()
            .filter(|p| student_id.map_or(true, |s| p.student_id == s))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.payment_date.cmp(&a.payment_date).then(b.id.cmp(&a.id)));
        Ok(rows)
    }

    fn fee_stat(&self) -> RepositoryResult<AggregateStat> {
        let state = self.state()?;
        let mut stat = AggregateStat::default();
        state.payments.values().for_each(|p| stat.push(p.amount));
        Ok(stat)
    }

    fn fee_stats_by_course(&self) -> RepositoryResult<Vec<(i64, AggregateStat)>> {
        let state = self.state()?;
        Ok(stats_grouped(
            state.payments.values().map(|p| (p.course_id, p.amount)),
        ))
    }

    fn salary_samples(&self, group_by: Option<GroupField>) -> RepositoryResult<Vec<MetricSample>> {
        match group_by {
            None | Some(GroupField::Teacher) => {}
            Some(other) => return Err(unsupported_group(other)),
        }
        let state = self.state()?;
        Ok(state
            .salaries
            .values()
            .map(|s| MetricSample {
                date: s.pay_date,
                value: s.salary_amount,
                group_key: group_by.map(|_| s.teacher_id),
            })
            .collect())
    }

    fn fee_samples(&self, group_by: Option<GroupField>) -> RepositoryResult<Vec<MetricSample>> {
        if let Some(GroupField::Teacher) = group_by {
            return Err(unsupported_group(GroupField::Teacher));
        }
        let state = self.state()?;
        Ok(state
            .payments
            .values()
            .map(|p| MetricSample {
                date: p.payment_date.date(),
                value: p.amount,
                group_key: match group_by {
                    Some(GroupField::Course) => Some(p.course_id),
                    Some(GroupField::Student) => Some(p.student_id),
                    _ => None,
                },
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn teacher_with_course(repo: &InMemorySchoolRepository) -> (i64, i64) {
        let teacher = repo
            .insert_user(&NewUser {
                name: "T".to_string(),
                email: "t@school.test".to_string(),
                role: Role::Teacher,
            })
            .unwrap();
        let classroom = repo.insert_classroom("A").unwrap();
        let course = repo
            .insert_course(&NewCourse {
                title: "C".to_string(),
                description: None,
                teacher_id: teacher,
                classroom_id: classroom,
                fee: 0.0,
                start_date: NaiveDate::from_ymd_opt(2025, 1, 1),
                end_date: None,
                published: true,
            })
            .unwrap();
        (teacher, course)
    }

    #[test]
    fn test_injected_faults_are_consumed_in_order() {
        let repo = InMemorySchoolRepository::new();
        repo.inject_faults(InjectedFault::Busy, 1);
        repo.inject_faults(InjectedFault::Conflict, 1);

        assert!(repo.count_users().unwrap_err().is_transient());
        assert!(repo.count_users().unwrap_err().is_conflict());
        assert_eq!(repo.pending_faults(), 0);
        assert_eq!(repo.count_users().unwrap(), 0);
    }

    #[test]
    fn test_foreign_keys_are_enforced() {
        let repo = InMemorySchoolRepository::new();
        let err = repo.enroll_student(1, 2).unwrap_err();
        assert!(matches!(err, RepositoryError::ForeignKeyViolation(_)));
    }

    #[test]
    fn test_delete_teacher_with_course_rejected() {
        let repo = InMemorySchoolRepository::new();
        let (teacher, course) = teacher_with_course(&repo);

        assert!(matches!(
            repo.delete_user(teacher).unwrap_err(),
            RepositoryError::ForeignKeyViolation(_)
        ));
        assert!(repo.delete_course(course).unwrap());
        assert!(repo.delete_user(teacher).unwrap());
        assert!(!repo.delete_user(teacher).unwrap());
    }

    #[test]
    fn test_duplicate_email_is_conflict() {
        let repo = InMemorySchoolRepository::new();
        teacher_with_course(&repo);
        let err = repo
            .insert_user(&NewUser {
                name: "T2".to_string(),
                email: "t@school.test".to_string(),
                role: Role::Teacher,
            })
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_find_answer_matches_question() {
        let repo = InMemorySchoolRepository::new();
        let (teacher, course) = teacher_with_course(&repo);
        let student = repo
            .insert_user(&NewUser {
                name: "S".to_string(),
                email: "s@school.test".to_string(),
                role: Role::Student,
            })
            .unwrap();
        let due = NaiveDate::from_ymd_opt(2025, 3, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let assignment = repo
            .insert_assignment(
                teacher,
                &NewAssignment {
                    course_id: course,
                    title: "A1".to_string(),
                    description: None,
                    instructions: None,
                    due_date: due,
                    max_points: 10,
                    published: true,
                },
            )
            .unwrap();
        let mut options = BTreeMap::new();
        options.insert("A".to_string(), "1".to_string());
        options.insert("B".to_string(), "2".to_string());
        let mut question_ids = Vec::new();
        for _ in 0..2 {
            let q = repo
                .insert_question(
                    assignment,
                    &NewQuestion {
                        question_text: "1 + 1 = ?".to_string(),
                        options: options.clone(),
                        correct_answer: "B".to_string(),
                        points: 5,
                    },
                )
                .unwrap();
            question_ids.push(q);
        }
        repo.upsert_answer(
            student,
            assignment,
            &AnswerSubmission {
                question_id: question_ids[0],
                chosen_answer: "B".to_string(),
            },
            due,
        )
        .unwrap();

        let found = repo
            .find_answer(student, assignment, question_ids[0])
            .unwrap()
            .unwrap();
        assert_eq!(found.question_id, question_ids[0]);
        assert_eq!(found.chosen_answer, "B");
        assert!(repo
            .find_answer(student, assignment, question_ids[1])
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_update_user_keeps_created_at_and_rejects_taken_email() {
        let repo = InMemorySchoolRepository::new();
        let (teacher, _) = teacher_with_course(&repo);
        let student = repo
            .insert_user(&NewUser {
                name: "S".to_string(),
                email: "s@school.test".to_string(),
                role: Role::Student,
            })
            .unwrap();
        let before = repo.find_user(student).unwrap().unwrap();

        let renamed = User {
            name: "S2".to_string(),
            ..before.clone()
        };
        assert!(repo.update_user(&renamed).unwrap());
        let after = repo.find_user(student).unwrap().unwrap();
        assert_eq!(after.name, "S2");
        assert_eq!(after.created_at, before.created_at);

        let clash = User {
            email: "t@school.test".to_string(),
            ..after
        };
        assert!(repo.update_user(&clash).unwrap_err().is_conflict());
        assert_eq!(repo.find_user(teacher).unwrap().unwrap().email, "t@school.test");
    }

    #[test]
    fn test_course_graded_students_skip_assignment_rows() {
        let repo = InMemorySchoolRepository::new();
        let (_, course) = teacher_with_course(&repo);
        let now = Utc::now().naive_utc();
        let grade = |student_id: i64, assignment_id: Option<i64>| OverallGrade {
            student_id,
            course_id: course,
            assignment_id,
            grade: 50.0,
            letter_grade: None,
            remarks: None,
            created_at: now,
            updated_at: now,
        };
        repo.insert_grade_raw(grade(7, None)).unwrap();
        repo.insert_grade_raw(grade(3, None)).unwrap();
        repo.insert_grade_raw(grade(9, Some(42))).unwrap();

        assert_eq!(repo.list_course_graded_students(course).unwrap(), vec![3, 7]);
    }
}
