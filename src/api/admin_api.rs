// ==========================================
// 校务管理后端 - 管理员 API
// ==========================================
// 职责: 看板与分桶序列、用户/课程/选课管理、工资登记、各类统计
// 输出: 金额/成绩/进度按 analytics_round_decimals 四舍五入
// ==========================================

use crate::api::access::{AccessPolicy, Operation, Principal};
use crate::api::dto::{
    round_to, rounded_averages, rounded_salary_summary, rounded_series, rounded_totals,
    CoursePatch, DashboardResponse, UserPatch,
};
use crate::api::error::{ApiError, ApiResult};
use crate::config::GradingConfig;
use crate::domain::{
    AssignmentSummary, BucketQuery, Course, CourseAverage, CourseFeePayment, CourseTotal,
    NewCourse, NewTeacherSalary, NewUser, Role, SalarySummary, TeacherSalary, TimeBucket, User,
};
use chrono::NaiveDate;
use crate::engine::AnalyticsAggregator;
use crate::repository::SchoolRepository;
use std::sync::Arc;

pub struct AdminApi {
    repo: Arc<dyn SchoolRepository>,
    analytics: AnalyticsAggregator,
    config: GradingConfig,
}

impl AdminApi {
    pub fn new(repo: Arc<dyn SchoolRepository>, config: GradingConfig) -> Self {
        Self {
            repo,
            analytics: AnalyticsAggregator::new(),
            config,
        }
    }

    fn decimals(&self) -> u32 {
        self.config.analytics_round_decimals
    }

    // ==========================================
    // 看板
    // ==========================================

    /// 管理员看板（已四舍五入）
    pub fn dashboard(&self, principal: &Principal) -> ApiResult<DashboardResponse> {
        AccessPolicy::authorize(principal, Operation::ViewDashboard)?;
        let snapshot = self.analytics.compute_dashboard(&*self.repo)?;
        Ok(DashboardResponse::from_snapshot(snapshot, self.decimals()))
    }

    /// 分桶序列
    ///
    /// # 返回
    /// - Err(ValidationError): 序列不支持该分组字段
    pub fn series(&self, principal: &Principal, query: &BucketQuery) -> ApiResult<Vec<TimeBucket>> {
        AccessPolicy::authorize(principal, Operation::ViewDashboard)?;
        let buckets = self.analytics.compute_time_bucketed(&*self.repo, query)?;
        Ok(rounded_series(buckets, self.decimals()))
    }

    // ==========================================
    // 用户
    // ==========================================

    pub fn users_by_role(&self, principal: &Principal, role: Role) -> ApiResult<Vec<User>> {
        AccessPolicy::authorize(principal, Operation::ManageUsers)?;
        Ok(self.repo.list_users_by_role(role)?)
    }

    /// 创建用户
    ///
    /// # 返回
    /// - Err(ValidationError): 姓名为空 / 邮箱格式错误
    /// - Err(Conflict): 邮箱已存在
    pub fn create_user(&self, principal: &Principal, user: &NewUser) -> ApiResult<User> {
        AccessPolicy::authorize(principal, Operation::ManageUsers)?;
        let normalized = NewUser {
            name: validate_name(&user.name)?.to_string(),
            email: validate_email(&user.email)?.to_string(),
            role: user.role,
        };
        let id = self.repo.insert_user(&normalized)?;
        tracing::info!(user_id = id, role = %normalized.role, "用户已创建");
        self.repo
            .find_user(id)?
            .ok_or_else(|| ApiError::InternalError(format!("用户 {} 写入后未找到", id)))
    }

    /// 更新用户（缺省字段保持不变）
    ///
    /// # 返回
    /// - Err(NotFound): 用户不存在
    /// - Err(ValidationError): 姓名为空 / 邮箱格式错误
    /// - Err(Conflict): 邮箱已被他人使用
    /// - Err(BusinessRuleViolation): 仍在授课的教师不能改为其他角色
    pub fn update_user(
        &self,
        principal: &Principal,
        user_id: i64,
        patch: &UserPatch,
    ) -> ApiResult<User> {
        AccessPolicy::authorize(principal, Operation::ManageUsers)?;
        let current = self
            .repo
            .find_user(user_id)?
            .ok_or_else(|| ApiError::NotFound(format!("User(id={})不存在", user_id)))?;

        let name = match &patch.name {
            Some(name) => validate_name(name)?.to_string(),
            None => current.name.clone(),
        };
        let email = match &patch.email {
            Some(email) => validate_email(email)?.to_string(),
            None => current.email.clone(),
        };
        let role = patch.role.unwrap_or(current.role);
        if current.role == Role::Teacher && role != Role::Teacher && self.is_teaching(user_id)? {
            return Err(ApiError::BusinessRuleViolation(format!(
                "教师 {} 仍在授课，不能改为 {}",
                user_id, role
            )));
        }

        let updated = User {
            name,
            email,
            role,
            ..current
        };
        if !self.repo.update_user(&updated)? {
            return Err(ApiError::NotFound(format!("User(id={})不存在", user_id)));
        }
        tracing::info!(user_id, role = %updated.role, "用户已更新");
        Ok(updated)
    }

    /// 删除用户
    ///
    /// # 返回
    /// - Err(NotFound): 用户不存在
    /// - Err(BusinessRuleViolation): 仍有课程或作业引用该用户
    pub fn delete_user(&self, principal: &Principal, user_id: i64) -> ApiResult<()> {
        AccessPolicy::authorize(principal, Operation::ManageUsers)?;
        if user_id == principal.user_id {
            return Err(ApiError::BusinessRuleViolation("不能删除当前登录用户".to_string()));
        }
        if !self.repo.delete_user(user_id)? {
            return Err(ApiError::NotFound(format!("User(id={})不存在", user_id)));
        }
        tracing::info!(user_id, "用户已删除");
        Ok(())
    }

    // ==========================================
    // 课程 / 选课
    // ==========================================

    /// 创建课程
    ///
    /// # 返回
    /// - Err(ValidationError): 标题为空 / 费用为负 / 起止日期倒置 / 授课人不是教师
    /// - Err(NotFound): 授课人或班级不存在
    pub fn create_course(&self, principal: &Principal, course: &NewCourse) -> ApiResult<Course> {
        AccessPolicy::authorize(principal, Operation::ManageCourses)?;
        validate_course_fields(&course.title, course.fee, course.start_date, course.end_date)?;
        self.require_role(course.teacher_id, Role::Teacher)?;
        self.require_classroom(course.classroom_id)?;

        let id = self.repo.insert_course(course)?;
        tracing::info!(course_id = id, teacher_id = course.teacher_id, "课程已创建");
        self.repo
            .find_course(id)?
            .ok_or_else(|| ApiError::InternalError(format!("课程 {} 写入后未找到", id)))
    }

    /// 更新课程（缺省字段保持不变，校验规则同创建）
    pub fn update_course(
        &self,
        principal: &Principal,
        course_id: i64,
        patch: &CoursePatch,
    ) -> ApiResult<Course> {
        AccessPolicy::authorize(principal, Operation::ManageCourses)?;
        let current = self
            .repo
            .find_course(course_id)?
            .ok_or_else(|| ApiError::NotFound(format!("Course(id={})不存在", course_id)))?;

        let updated = Course {
            title: patch.title.clone().unwrap_or_else(|| current.title.clone()),
            description: patch.description.clone().or_else(|| current.description.clone()),
            teacher_id: patch.teacher_id.unwrap_or(current.teacher_id),
            classroom_id: patch.classroom_id.unwrap_or(current.classroom_id),
            fee: patch.fee.unwrap_or(current.fee),
            start_date: patch.start_date.or(current.start_date),
            end_date: patch.end_date.or(current.end_date),
            published: patch.published.unwrap_or(current.published),
            ..current.clone()
        };
        validate_course_fields(&updated.title, updated.fee, updated.start_date, updated.end_date)?;
        if updated.teacher_id != current.teacher_id {
            self.require_role(updated.teacher_id, Role::Teacher)?;
        }
        if updated.classroom_id != current.classroom_id {
            self.require_classroom(updated.classroom_id)?;
        }

        self.repo.update_course(&updated)?;
        tracing::info!(course_id, teacher_id = updated.teacher_id, "课程已更新");
        Ok(updated)
    }

    pub fn delete_course(&self, principal: &Principal, course_id: i64) -> ApiResult<()> {
        AccessPolicy::authorize(principal, Operation::ManageCourses)?;
        if !self.repo.delete_course(course_id)? {
            return Err(ApiError::NotFound(format!("Course(id={})不存在", course_id)));
        }
        tracing::info!(course_id, "课程已删除");
        Ok(())
    }

    /// 选课（重复选课幂等）
    pub fn enroll_student(
        &self,
        principal: &Principal,
        student_id: i64,
        course_id: i64,
    ) -> ApiResult<()> {
        AccessPolicy::authorize(principal, Operation::ManageEnrollments)?;
        self.require_role(student_id, Role::Student)?;
        if self.repo.find_course(course_id)?.is_none() {
            return Err(ApiError::NotFound(format!("Course(id={})不存在", course_id)));
        }
        self.repo.enroll_student(student_id, course_id)?;
        tracing::info!(student_id, course_id, "学生已选课");
        Ok(())
    }

    // ==========================================
    // 工资
    // ==========================================

    /// 登记工资
    ///
    /// # 返回
    /// - Err(ValidationError): 金额 <= 0 / 对象不是教师
    pub fn record_salary(
        &self,
        principal: &Principal,
        salary: &NewTeacherSalary,
    ) -> ApiResult<TeacherSalary> {
        AccessPolicy::authorize(principal, Operation::RecordSalary)?;
        if !salary.salary_amount.is_finite() || salary.salary_amount <= 0.0 {
            return Err(ApiError::ValidationError(format!(
                "工资金额必须为正: {}",
                salary.salary_amount
            )));
        }
        self.require_role(salary.teacher_id, Role::Teacher)?;

        let id = self.repo.insert_salary(salary)?;
        tracing::info!(
            salary_id = id,
            teacher_id = salary.teacher_id,
            amount = salary.salary_amount,
            status = %salary.status,
            "工资已登记"
        );
        Ok(TeacherSalary {
            id,
            teacher_id: salary.teacher_id,
            salary_amount: salary.salary_amount,
            pay_date: salary.pay_date,
            status: salary.status,
            remarks: salary.remarks.clone(),
        })
    }

    /// 工资记录（发放日期倒序），可限定教师
    pub fn list_teacher_salaries(
        &self,
        principal: &Principal,
        teacher_id: Option<i64>,
    ) -> ApiResult<Vec<TeacherSalary>> {
        AccessPolicy::authorize(principal, Operation::RecordSalary)?;
        Ok(self.repo.list_salaries(teacher_id)?)
    }

    /// 学费缴纳记录（缴费时间倒序），可限定学生
    pub fn list_course_fee_payments(
        &self,
        principal: &Principal,
        student_id: Option<i64>,
    ) -> ApiResult<Vec<CourseFeePayment>> {
        AccessPolicy::authorize(principal, Operation::ViewSchoolAnalytics)?;
        Ok(self.repo.list_fee_payments(student_id)?)
    }

    // ==========================================
    // 统计
    // ==========================================

    pub fn salary_analytics(
        &self,
        principal: &Principal,
        teacher_id: Option<i64>,
    ) -> ApiResult<SalarySummary> {
        AccessPolicy::authorize(principal, Operation::ViewSchoolAnalytics)?;
        let summary = self.analytics.salary_summary(&*self.repo, teacher_id)?;
        Ok(rounded_salary_summary(summary, self.decimals()))
    }

    pub fn fee_analytics(&self, principal: &Principal) -> ApiResult<Vec<CourseTotal>> {
        AccessPolicy::authorize(principal, Operation::ViewSchoolAnalytics)?;
        let rows = self.analytics.fee_totals_by_course(&*self.repo)?;
        Ok(rounded_totals(rows, self.decimals()))
    }

    pub fn progress_analytics(&self, principal: &Principal) -> ApiResult<Vec<CourseAverage>> {
        AccessPolicy::authorize(principal, Operation::ViewSchoolAnalytics)?;
        let rows = self.analytics.progress_by_course(&*self.repo, None)?;
        Ok(rounded_averages(rows, self.decimals()))
    }

    pub fn grade_analytics(&self, principal: &Principal) -> ApiResult<Vec<CourseAverage>> {
        AccessPolicy::authorize(principal, Operation::ViewSchoolAnalytics)?;
        let rows = self.analytics.grade_by_course(&*self.repo)?;
        Ok(rounded_averages(rows, self.decimals()))
    }

    /// 任意作业的作答统计（不校验授课教师）
    pub fn assignment_analytics(
        &self,
        principal: &Principal,
        assignment_id: i64,
    ) -> ApiResult<AssignmentSummary> {
        AccessPolicy::authorize(principal, Operation::ViewAssignmentAnalytics)?;
        let summary = self
            .analytics
            .assignment_summary(&*self.repo, assignment_id)?;
        Ok(AssignmentSummary {
            average_score: round_to(summary.average_score, self.decimals()),
            ..summary
        })
    }

    fn require_role(&self, user_id: i64, role: Role) -> ApiResult<User> {
        let user = self
            .repo
            .find_user(user_id)?
            .ok_or_else(|| ApiError::NotFound(format!("User(id={})不存在", user_id)))?;
        if user.role != role {
            return Err(ApiError::ValidationError(format!(
                "用户 {} 的角色是 {}，需要 {}",
                user_id, user.role, role
            )));
        }
        Ok(user)
    }

    fn require_classroom(&self, classroom_id: i64) -> ApiResult<()> {
        if self.repo.find_classroom(classroom_id)?.is_none() {
            return Err(ApiError::NotFound(format!(
                "Classroom(id={})不存在",
                classroom_id
            )));
        }
        Ok(())
    }

    fn is_teaching(&self, teacher_id: i64) -> ApiResult<bool> {
        if !self.repo.list_assignments_by_teacher(teacher_id)?.is_empty() {
            return Ok(true);
        }
        let courses = self.repo.list_courses(false)?;
        Ok(courses.iter().any(|c| c.teacher_id == teacher_id))
    }
}

fn validate_name(name: &str) -> ApiResult<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ApiError::ValidationError("姓名不能为空".to_string()));
    }
    Ok(name)
}

fn validate_email(email: &str) -> ApiResult<&str> {
    let trimmed = email.trim();
    match trimmed.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(trimmed),
        _ => Err(ApiError::ValidationError(format!("邮箱格式错误: {}", email))),
    }
}

fn validate_course_fields(
    title: &str,
    fee: f64,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
) -> ApiResult<()> {
    if title.trim().is_empty() {
        return Err(ApiError::ValidationError("课程标题不能为空".to_string()));
    }
    if !fee.is_finite() || fee < 0.0 {
        return Err(ApiError::ValidationError(format!("课程费用不能为负: {}", fee)));
    }
    if let (Some(start), Some(end)) = (start_date, end_date) {
        if end < start {
            return Err(ApiError::ValidationError(format!(
                "结课日期 {} 早于开课日期 {}",
                end, start
            )));
        }
    }
    Ok(())
}
