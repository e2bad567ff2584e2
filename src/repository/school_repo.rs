// ==========================================
// 校务管理后端 - 仓储接口 (Repository Traits)
// ==========================================
// 红线: Repository 不含业务规则，只做数据 CRUD 与过滤聚合
// 实现者:
// - SqliteSchoolRepository（rusqlite）
// - InMemorySchoolRepository（内存实现，测试与无库场景）
// ==========================================
// 级联删除: 数据库不依赖 ON DELETE CASCADE，
// 由实现按"子表 → 父表"顺序显式删除
// ==========================================

use crate::domain::{
    AggregateStat, AnswerSubmission, Assignment, Classroom, Course, CourseFeePayment, GroupField,
    MetricSample, NewAssignment, NewCourse, NewCourseFeePayment, NewQuestion, NewTeacherSalary,
    NewUser, OverallGrade, Question, Role, SalaryStatus, StudentAnswer, StudentProgress,
    TeacherSalary, User,
};
use crate::repository::error::RepositoryResult;
use chrono::NaiveDateTime;

// ==========================================
// CourseworkRepository - 用户/课程/作业/作答
// ==========================================
pub trait CourseworkRepository {
    // ===== 用户 =====

    fn insert_user(&self, user: &NewUser) -> RepositoryResult<i64>;

    fn find_user(&self, user_id: i64) -> RepositoryResult<Option<User>>;

    /// 按角色列出用户（创建时间倒序）
    fn list_users_by_role(&self, role: Role) -> RepositoryResult<Vec<User>>;

    fn count_users(&self) -> RepositoryResult<u64>;

    fn count_users_by_role(&self, role: Role) -> RepositoryResult<u64>;

    /// 按 id 覆盖 name/email/role（created_at 不变）
    ///
    /// email 与他人重复时返回 UniqueConstraintViolation
    fn update_user(&self, user: &User) -> RepositoryResult<bool>;

    /// 删除用户及其作答/进度/成绩/选课/缴费/工资记录
    ///
    /// 仍在授课（课程或作业引用该用户）时返回 ForeignKeyViolation
    ///
    /// # 返回
    /// - Ok(true): 已删除
    /// - Ok(false): 用户不存在
    fn delete_user(&self, user_id: i64) -> RepositoryResult<bool>;

    // ===== 班级 / 课程 =====

    fn insert_classroom(&self, name: &str) -> RepositoryResult<i64>;

    fn find_classroom(&self, classroom_id: i64) -> RepositoryResult<Option<Classroom>>;

    fn insert_course(&self, course: &NewCourse) -> RepositoryResult<i64>;

    fn find_course(&self, course_id: i64) -> RepositoryResult<Option<Course>>;

    /// 按 id 覆盖课程全部字段
    fn update_course(&self, course: &Course) -> RepositoryResult<bool>;

    /// 列出课程（按开课日期升序）
    fn list_courses(&self, published_only: bool) -> RepositoryResult<Vec<Course>>;

    fn count_courses(&self) -> RepositoryResult<u64>;

    /// 删除课程，级联删除其作业、题目、作答、进度、成绩、选课与缴费记录
    fn delete_course(&self, course_id: i64) -> RepositoryResult<bool>;

    /// 选课（重复选课为幂等操作）
    fn enroll_student(&self, student_id: i64, course_id: i64) -> RepositoryResult<()>;

    fn is_enrolled(&self, student_id: i64, course_id: i64) -> RepositoryResult<bool>;

    // ===== 作业 =====

    fn insert_assignment(&self, teacher_id: i64, assignment: &NewAssignment)
        -> RepositoryResult<i64>;

    /// 覆盖更新作业（按 id）
    fn update_assignment(&self, assignment: &Assignment) -> RepositoryResult<bool>;

    fn find_assignment(&self, assignment_id: i64) -> RepositoryResult<Option<Assignment>>;

    /// 列出课程下的作业（按截止时间升序）
    fn list_assignments_by_course(
        &self,
        course_id: i64,
        published_only: bool,
    ) -> RepositoryResult<Vec<Assignment>>;

    fn list_assignments_by_teacher(&self, teacher_id: i64) -> RepositoryResult<Vec<Assignment>>;

    fn count_assignments(&self) -> RepositoryResult<u64>;

    /// 删除作业，级联删除题目、作答以及以该作业为键的进度/成绩
    fn delete_assignment(&self, assignment_id: i64) -> RepositoryResult<bool>;

    // ===== 题目 =====

    fn insert_question(&self, assignment_id: i64, question: &NewQuestion)
        -> RepositoryResult<i64>;

    fn find_question(&self, question_id: i64) -> RepositoryResult<Option<Question>>;

    /// 列出作业题目（按 id 升序，即题目顺序）
    fn list_questions(&self, assignment_id: i64) -> RepositoryResult<Vec<Question>>;

    fn count_questions(&self, assignment_id: i64) -> RepositoryResult<u64>;

    // ===== 作答 =====

    /// 条件插入或更新作答（键: student, assignment, question）
    ///
    /// 已存在时只覆盖 chosen_answer / submitted_at，score / feedback 保持不变
    fn upsert_answer(
        &self,
        student_id: i64,
        assignment_id: i64,
        submission: &AnswerSubmission,
        submitted_at: NaiveDateTime,
    ) -> RepositoryResult<StudentAnswer>;

    fn find_answer(
        &self,
        student_id: i64,
        assignment_id: i64,
        question_id: i64,
    ) -> RepositoryResult<Option<StudentAnswer>>;

    fn list_answers(&self, assignment_id: i64, student_id: i64)
        -> RepositoryResult<Vec<StudentAnswer>>;

    /// 学生在作业中已作答的不同题目数
    fn count_answered_questions(&self, assignment_id: i64, student_id: i64)
        -> RepositoryResult<u64>;

    /// 学生在作业中的得分合计（未评分按 0 计）
    fn sum_answer_scores(&self, assignment_id: i64, student_id: i64) -> RepositoryResult<i64>;

    /// 写入评分与评语
    fn set_answer_score(
        &self,
        answer_id: i64,
        score: i64,
        feedback: Option<&str>,
    ) -> RepositoryResult<bool>;

    fn find_answer_by_id(&self, answer_id: i64) -> RepositoryResult<Option<StudentAnswer>>;

    /// 作业作答统计
    ///
    /// # 返回
    /// - (作答行数, 已评分行的 score 求和/计数)
    fn answer_score_stat(&self, assignment_id: i64) -> RepositoryResult<(u64, AggregateStat)>;

    /// 在作业中有作答记录的学生（升序去重）
    fn list_answering_students(&self, assignment_id: i64) -> RepositoryResult<Vec<i64>>;
}

// ==========================================
// GradebookRepository - 进度与总评
// ==========================================
pub trait GradebookRepository {
    /// 按唯一键 upsert 进度（作业级: student+assignment；课程级: student+course）
    fn upsert_progress(&self, progress: &StudentProgress) -> RepositoryResult<StudentProgress>;

    fn find_progress(
        &self,
        student_id: i64,
        assignment_id: i64,
    ) -> RepositoryResult<Option<StudentProgress>>;

    /// 学生全部进度（更新时间倒序）
    fn list_progress_by_student(&self, student_id: i64) -> RepositoryResult<Vec<StudentProgress>>;

    /// 按唯一键 upsert 总评，已存在时保留 created_at
    fn upsert_grade(&self, grade: &OverallGrade) -> RepositoryResult<OverallGrade>;

    fn find_grade(
        &self,
        student_id: i64,
        course_id: i64,
        assignment_id: Option<i64>,
    ) -> RepositoryResult<Option<OverallGrade>>;

    fn list_grades_by_student(&self, student_id: i64) -> RepositoryResult<Vec<OverallGrade>>;

    /// 持有课程级总评（assignment_id 为空）的学生（升序）
    fn list_course_graded_students(&self, course_id: i64) -> RepositoryResult<Vec<i64>>;

    /// 作业级成绩（按 student_id 升序）
    fn list_grades_by_assignment(&self, assignment_id: i64) -> RepositoryResult<Vec<OverallGrade>>;

    /// 全部总评的 grade 求和/计数
    fn grade_stat(&self) -> RepositoryResult<AggregateStat>;

    /// 全部进度的 progress_percentage 求和/计数
    fn progress_stat(&self) -> RepositoryResult<AggregateStat>;

    /// 单个作业的进度求和/计数
    fn progress_stat_by_assignment(&self, assignment_id: i64) -> RepositoryResult<AggregateStat>;

    /// 按课程分组的 grade 求和/计数（course_id 升序）
    fn grade_stats_by_course(&self) -> RepositoryResult<Vec<(i64, AggregateStat)>>;

    /// 按课程分组的进度求和/计数，可限定学生（course_id 升序，忽略无课程的行）
    fn progress_stats_by_course(
        &self,
        student_id: Option<i64>,
    ) -> RepositoryResult<Vec<(i64, AggregateStat)>>;

    /// 总评样本（created_at 日期 + grade）
    fn grade_samples(&self, group_by: Option<GroupField>) -> RepositoryResult<Vec<MetricSample>>;
}

// ==========================================
// LedgerRepository - 工资与学费流水（只追加）
// ==========================================
pub trait LedgerRepository {
    fn insert_salary(&self, salary: &NewTeacherSalary) -> RepositoryResult<i64>;

    /// 工资记录（发放日期倒序），可限定教师
    fn list_salaries(&self, teacher_id: Option<i64>) -> RepositoryResult<Vec<TeacherSalary>>;

    /// 工资求和/计数，可按状态与教师过滤
    fn salary_stat(
        &self,
        status: Option<SalaryStatus>,
        teacher_id: Option<i64>,
    ) -> RepositoryResult<AggregateStat>;

    fn insert_fee_payment(&self, payment: &NewCourseFeePayment) -> RepositoryResult<i64>;

    /// 缴费记录（缴费时间倒序），可限定学生
    fn list_fee_payments(&self, student_id: Option<i64>) -> RepositoryResult<Vec<CourseFeePayment>>;

    fn fee_stat(&self) -> RepositoryResult<AggregateStat>;

    /// 按课程分组的缴费求和/计数（course_id 升序）
    fn fee_stats_by_course(&self) -> RepositoryResult<Vec<(i64, AggregateStat)>>;

    /// 工资样本（pay_date + salary_amount）
    fn salary_samples(&self, group_by: Option<GroupField>) -> RepositoryResult<Vec<MetricSample>>;

    /// 缴费样本（payment_date 日期 + amount）
    fn fee_samples(&self, group_by: Option<GroupField>) -> RepositoryResult<Vec<MetricSample>>;
}

// ==========================================
// SchoolRepository - 聚合接口
// ==========================================
// 用途: API 层以 Arc<dyn SchoolRepository> 持有完整仓储
pub trait SchoolRepository:
    CourseworkRepository + GradebookRepository + LedgerRepository + Send + Sync
{
}

impl<T> SchoolRepository for T where
    T: CourseworkRepository + GradebookRepository + LedgerRepository + Send + Sync
{
}
