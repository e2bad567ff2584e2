// ==========================================
// 校务管理后端 - 作业/题目/作答领域模型
// ==========================================
// 红线: 作答记录按 (student, assignment, question) 唯一
// 红线: 重新提交只覆盖 chosen_answer/submitted_at，不触碰评分
// ==========================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ==========================================
// Assignment - 作业
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: i64,
    pub course_id: i64,
    pub teacher_id: i64,               // 布置作业的教师（唯一可修改者）
    pub title: String,
    pub description: Option<String>,
    pub instructions: Option<String>,
    pub due_date: NaiveDateTime,
    pub max_points: i64,               // 满分 (正整数)
    pub published: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAssignment {
    pub course_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub instructions: Option<String>,
    pub due_date: NaiveDateTime,
    pub max_points: i64,
    pub published: bool,
}

// ==========================================
// Question - 题目
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: i64,
    pub assignment_id: i64,
    pub question_text: String,
    pub options: BTreeMap<String, String>, // 选项: 标签 → 文本，落库为 JSON
    pub correct_answer: String,
    pub points: i64,                       // 分值 (正整数)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewQuestion {
    pub question_text: String,
    pub options: BTreeMap<String, String>,
    pub correct_answer: String,
    pub points: i64,
}

// ==========================================
// StudentAnswer - 学生作答
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentAnswer {
    pub id: i64,
    pub student_id: i64,
    pub assignment_id: i64,
    pub question_id: i64,
    pub chosen_answer: String,
    pub score: Option<i64>,        // 未评分为 None，汇总时按 0 计
    pub feedback: Option<String>,
    pub submitted_at: NaiveDateTime,
}

/// 单题提交内容
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerSubmission {
    pub question_id: i64,
    pub chosen_answer: String,
}

/// 作答反馈视图（题干 + 作答 + 评分）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerFeedback {
    pub question_id: i64,
    pub question: String,
    pub chosen_answer: String,
    pub score: Option<i64>,
    pub feedback: Option<String>,
    pub submitted_at: NaiveDateTime,
}
