// ==========================================
// 校务管理后端 - 财务流水领域模型
// ==========================================
// 红线: 工资/学费流水只追加，核心逻辑从不修改
// ==========================================

use crate::domain::types::SalaryStatus;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

// ==========================================
// TeacherSalary - 教师工资
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeacherSalary {
    pub id: i64,
    pub teacher_id: i64,
    pub salary_amount: f64,
    pub pay_date: NaiveDate,
    pub status: SalaryStatus,
    pub remarks: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTeacherSalary {
    pub teacher_id: i64,
    pub salary_amount: f64,
    pub pay_date: NaiveDate,
    pub status: SalaryStatus,
    pub remarks: Option<String>,
}

// ==========================================
// CourseFeePayment - 学费缴纳
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseFeePayment {
    pub id: i64,
    pub course_id: i64,
    pub student_id: i64,
    pub amount: f64,
    pub payment_date: NaiveDateTime,
    pub payment_method: Option<String>,
    pub transaction_id: Option<String>, // 唯一
    pub remarks: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCourseFeePayment {
    pub course_id: i64,
    pub student_id: i64,
    pub amount: f64,
    pub payment_date: NaiveDateTime,
    pub payment_method: Option<String>,
    pub transaction_id: Option<String>,
    pub remarks: Option<String>,
}
