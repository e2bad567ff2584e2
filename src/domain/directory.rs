// ==========================================
// 校务管理后端 - 用户/班级/课程领域模型
// ==========================================

use crate::domain::types::Role;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

// ==========================================
// User - 用户
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub created_at: NaiveDateTime,
}

/// 新建用户请求（密码哈希由外层服务处理，这里不涉及）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub role: Role,
}

// ==========================================
// Classroom - 班级
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classroom {
    pub id: i64,
    pub name: String,
}

// ==========================================
// Course - 课程
// ==========================================
// 归属: 一名授课教师 + 一个班级
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub teacher_id: i64,
    pub classroom_id: i64,
    pub fee: f64,                       // 课程费用 (>= 0)
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub published: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCourse {
    pub title: String,
    pub description: Option<String>,
    pub teacher_id: i64,
    pub classroom_id: i64,
    pub fee: f64,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub published: bool,
}
