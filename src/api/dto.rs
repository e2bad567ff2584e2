// ==========================================
// 校务管理后端 - API 数据传输对象
// ==========================================
// 展示层结构：金额/成绩/进度在这里四舍五入
// ==========================================

use crate::domain::{
    Assignment, CourseAverage, CourseTotal, DashboardSnapshot, OverallGrade, Question,
    SalarySummary, StudentAnswer, StudentProgress, TimeBucket,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 四舍五入到 `decimals` 位小数
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

fn round_buckets(buckets: Vec<TimeBucket>, decimals: u32) -> Vec<TimeBucket> {
    buckets
        .into_iter()
        .map(|b| TimeBucket {
            aggregate: round_to(b.aggregate, decimals),
            ..b
        })
        .collect()
}

// ==========================================
// 看板
// ==========================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverallStats {
    pub total_users: u64,
    pub total_admins: u64,
    pub total_teachers: u64,
    pub total_students: u64,
    pub total_courses: u64,
    pub total_assignments: u64,
    pub average_grade: f64,
    pub average_progress: f64,
    pub total_paid_salaries: f64,
    pub total_course_fees: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardResponse {
    pub overall: OverallStats,
    pub teacher_weekly: Vec<TimeBucket>,
    pub teacher_monthly: Vec<TimeBucket>,
    pub student_fee_weekly: Vec<TimeBucket>,
    pub student_fee_monthly: Vec<TimeBucket>,
    pub student_weekly: Vec<TimeBucket>,
    pub student_monthly: Vec<TimeBucket>,
}

impl DashboardResponse {
    pub fn from_snapshot(snapshot: DashboardSnapshot, decimals: u32) -> Self {
        Self {
            overall: OverallStats {
                total_users: snapshot.total_users,
                total_admins: snapshot.total_admins,
                total_teachers: snapshot.total_teachers,
                total_students: snapshot.total_students,
                total_courses: snapshot.total_courses,
                total_assignments: snapshot.total_assignments,
                average_grade: round_to(snapshot.average_grade, decimals),
                average_progress: round_to(snapshot.average_progress, decimals),
                total_paid_salaries: round_to(snapshot.total_paid_salaries, decimals),
                total_course_fees: round_to(snapshot.total_course_fees, decimals),
            },
            teacher_weekly: round_buckets(snapshot.teacher_weekly, decimals),
            teacher_monthly: round_buckets(snapshot.teacher_monthly, decimals),
            student_fee_weekly: round_buckets(snapshot.student_fee_weekly, decimals),
            student_fee_monthly: round_buckets(snapshot.student_fee_monthly, decimals),
            student_weekly: round_buckets(snapshot.student_weekly, decimals),
            student_monthly: round_buckets(snapshot.student_monthly, decimals),
        }
    }
}

/// 分桶序列（已四舍五入）
pub fn rounded_series(buckets: Vec<TimeBucket>, decimals: u32) -> Vec<TimeBucket> {
    round_buckets(buckets, decimals)
}

pub fn rounded_averages(rows: Vec<CourseAverage>, decimals: u32) -> Vec<CourseAverage> {
    rows.into_iter()
        .map(|r| CourseAverage {
            average: round_to(r.average, decimals),
            ..r
        })
        .collect()
}

pub fn rounded_totals(rows: Vec<CourseTotal>, decimals: u32) -> Vec<CourseTotal> {
    rows.into_iter()
        .map(|r| CourseTotal {
            total: round_to(r.total, decimals),
            ..r
        })
        .collect()
}

pub fn rounded_salary_summary(summary: SalarySummary, decimals: u32) -> SalarySummary {
    SalarySummary {
        total_paid: round_to(summary.total_paid, decimals),
        average_salary: round_to(summary.average_salary, decimals),
        pending_payments: summary.pending_payments,
    }
}

// ==========================================
// 学生视图
// ==========================================

/// 学生可见的题目（不含正确答案）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionView {
    pub id: i64,
    pub question_text: String,
    pub options: BTreeMap<String, String>,
    pub points: i64,
}

impl From<Question> for QuestionView {
    fn from(q: Question) -> Self {
        Self {
            id: q.id,
            question_text: q.question_text,
            options: q.options,
            points: q.points,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentDetail {
    pub assignment: Assignment,
    pub questions: Vec<QuestionView>,
}

/// 提交后的重算结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionResult {
    pub answers: Vec<StudentAnswer>,
    pub progress: StudentProgress,
    pub overall_grade: OverallGrade,
}

/// 缴费请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeePaymentRequest {
    pub amount: f64,
    pub payment_method: Option<String>,
    pub transaction_id: Option<String>,
    pub remarks: Option<String>,
}

// ==========================================
// 教师视图
// ==========================================

/// 成绩导出行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeExportRow {
    pub student_id: i64,
    pub student_name: String,
    pub email: String,
    pub grade: f64,
    pub letter_grade: Option<String>,
    pub remarks: Option<String>,
}

/// 作业更新请求（缺省字段保持不变）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssignmentPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub instructions: Option<String>,
    pub due_date: Option<chrono::NaiveDateTime>,
    pub max_points: Option<i64>,
    pub published: Option<bool>,
}

// ==========================================
// 管理员视图
// ==========================================

/// 用户更新请求（缺省字段保持不变）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub role: Option<crate::domain::Role>,
}

/// 课程更新请求（缺省字段保持不变）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoursePatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub teacher_id: Option<i64>,
    pub classroom_id: Option<i64>,
    pub fee: Option<f64>,
    pub start_date: Option<chrono::NaiveDate>,
    pub end_date: Option<chrono::NaiveDate>,
    pub published: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_to_two_decimals() {
        assert_eq!(round_to(66.666_666, 2), 66.67);
        assert_eq!(round_to(0.0, 2), 0.0);
        assert_eq!(round_to(12.5, 0), 13.0);
    }

    #[test]
    fn test_question_view_hides_answer() {
        let view = QuestionView::from(Question {
            id: 1,
            assignment_id: 2,
            question_text: "1+1".to_string(),
            options: BTreeMap::new(),
            correct_answer: "B".to_string(),
            points: 5,
        });
        let json = serde_json::to_string(&view).unwrap();
        assert!(!json.contains("correct_answer"));
    }
}
