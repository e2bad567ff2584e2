// ==========================================
// 校务管理后端 - 进度与总评领域模型
// ==========================================
// 红线: 进度/总评只做原位重算，不追加新行
// ==========================================

use crate::domain::types::ProgressStatus;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ==========================================
// StudentProgress - 学生作业进度
// ==========================================
// 唯一键: (student_id, assignment_id)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentProgress {
    pub student_id: i64,
    pub assignment_id: Option<i64>,
    pub course_id: Option<i64>,
    pub progress_percentage: f64, // [0, 100]
    pub status: ProgressStatus,
    pub updated_at: NaiveDateTime,
}

// ==========================================
// OverallGrade - 总评成绩
// ==========================================
// 唯一键: (student_id, course_id, assignment_id)
// assignment_id 为 None 时表示课程级总评
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverallGrade {
    pub student_id: i64,
    pub course_id: i64,
    pub assignment_id: Option<i64>,
    pub grade: f64,                   // [0, 100]，保留完整精度
    pub letter_grade: Option<String>, // 等级制映射由外部处理
    pub remarks: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}
