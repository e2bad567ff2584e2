// ==========================================
// 校务管理后端 - 统计分析领域模型
// ==========================================
// 职责: 定义分桶序列、看板快照、各类汇总视图
// 红线: 原始聚合保留完整精度，四舍五入只在展示层做
// ==========================================

use crate::domain::types::Granularity;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ==========================================
// 聚合方式
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFn {
    Sum,
    Avg,
}

// ==========================================
// 分组字段
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupField {
    Teacher,
    Course,
    Student,
}

impl GroupField {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "teacher" | "teacher_id" => Some(GroupField::Teacher),
            "course" | "course_id" => Some(GroupField::Course),
            "student" | "student_id" => Some(GroupField::Student),
            _ => None,
        }
    }
}

// ==========================================
// BucketSeries - 可分桶的统计序列
// ==========================================
// | 序列          | 日期字段      | 指标字段       | 聚合 |
// |---------------|---------------|----------------|------|
// | TeacherSalary | pay_date      | salary_amount  | SUM  |
// | CourseFee     | payment_date  | amount         | SUM  |
// | OverallGrade  | created_at    | grade          | AVG  |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketSeries {
    TeacherSalary,
    CourseFee,
    OverallGrade,
}

impl BucketSeries {
    pub fn aggregate_fn(&self) -> AggregateFn {
        match self {
            BucketSeries::TeacherSalary | BucketSeries::CourseFee => AggregateFn::Sum,
            BucketSeries::OverallGrade => AggregateFn::Avg,
        }
    }

    /// 日期字段名（用于日志与导出）
    pub fn date_field(&self) -> &'static str {
        match self {
            BucketSeries::TeacherSalary => "pay_date",
            BucketSeries::CourseFee => "payment_date",
            BucketSeries::OverallGrade => "created_at",
        }
    }

    pub fn metric_field(&self) -> &'static str {
        match self {
            BucketSeries::TeacherSalary => "salary_amount",
            BucketSeries::CourseFee => "amount",
            BucketSeries::OverallGrade => "grade",
        }
    }

    /// 该序列支持的分组字段
    pub fn supports_group(&self, group: GroupField) -> bool {
        matches!(
            (self, group),
            (BucketSeries::TeacherSalary, GroupField::Teacher)
                | (BucketSeries::CourseFee, GroupField::Course)
                | (BucketSeries::CourseFee, GroupField::Student)
                | (BucketSeries::OverallGrade, GroupField::Course)
                | (BucketSeries::OverallGrade, GroupField::Student)
        )
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "teacher_salary" | "salary" | "salaries" => Some(BucketSeries::TeacherSalary),
            "course_fee" | "fee" | "fees" => Some(BucketSeries::CourseFee),
            "overall_grade" | "grade" | "grades" => Some(BucketSeries::OverallGrade),
            _ => None,
        }
    }
}

/// 仓储层返回的原始样本（一行源数据）
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub date: NaiveDate,
    pub value: f64,
    pub group_key: Option<i64>,
}

// ==========================================
// AggregateStat - 求和 + 计数
// ==========================================
// 仓储层只给出 sum/count，平均值由引擎计算（空集为 0）
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AggregateStat {
    pub sum: f64,
    pub count: u64,
}

impl AggregateStat {
    pub fn new(sum: f64, count: u64) -> Self {
        Self { sum, count }
    }

    pub fn push(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    /// 平均值，空集返回 0（不产生 NaN）
    pub fn average(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

// ==========================================
// TimeBucket - 时间分桶结果
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeBucket {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<i64>,
    pub year: i32,        // 周粒度为 ISO 周年
    pub period: u32,      // ISO 周号 (1-53) 或月份 (1-12)
    pub aggregate: f64,
    pub count: u64,
}

/// 分桶查询参数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketQuery {
    pub series: BucketSeries,
    pub granularity: Granularity,
    pub group_by: Option<GroupField>,
}

impl BucketQuery {
    pub fn new(series: BucketSeries, granularity: Granularity) -> Self {
        Self {
            series,
            granularity,
            group_by: None,
        }
    }

    pub fn grouped_by(mut self, group: GroupField) -> Self {
        self.group_by = Some(group);
        self
    }
}

// ==========================================
// DashboardSnapshot - 管理员看板快照（原始精度）
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSnapshot {
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

    pub teacher_weekly: Vec<TimeBucket>,
    pub teacher_monthly: Vec<TimeBucket>,
    pub student_fee_weekly: Vec<TimeBucket>,
    pub student_fee_monthly: Vec<TimeBucket>,
    pub student_weekly: Vec<TimeBucket>,
    pub student_monthly: Vec<TimeBucket>,
}

// ==========================================
// 其他汇总视图
// ==========================================

/// 单个作业的提交统计
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentSummary {
    pub assignment_id: i64,
    pub title: String,
    pub submission_count: u64,
    pub graded_count: u64,
    pub average_score: f64,
}

/// 教师名下单个作业的进度概览
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentProgress {
    pub assignment_id: i64,
    pub title: String,
    pub avg_progress: f64, // 无进度记录时为 0
    pub submission_count: u64,
}

/// 工资汇总
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalarySummary {
    pub total_paid: f64,
    pub average_salary: f64,
    pub pending_payments: u64,
}

/// 按课程汇总（总额）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseTotal {
    pub course_id: i64,
    pub total: f64,
    pub count: u64,
}

/// 按课程汇总（平均值）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseAverage {
    pub course_id: i64,
    pub average: f64,
    pub count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_stat_empty_average_is_zero() {
        let stat = AggregateStat::default();
        assert_eq!(stat.average(), 0.0);
        assert!(!stat.average().is_nan());
    }

    #[test]
    fn test_series_group_support() {
        assert!(BucketSeries::TeacherSalary.supports_group(GroupField::Teacher));
        assert!(!BucketSeries::TeacherSalary.supports_group(GroupField::Course));
        assert!(BucketSeries::OverallGrade.supports_group(GroupField::Student));
        assert_eq!(BucketSeries::CourseFee.aggregate_fn(), AggregateFn::Sum);
        assert_eq!(BucketSeries::OverallGrade.aggregate_fn(), AggregateFn::Avg);
    }
}
