// ==========================================
// 引擎单元测试共用夹具（内存仓储）
// ==========================================

use crate::domain::{
    AnswerSubmission, NewAssignment, NewCourse, NewQuestion, NewUser, Role,
};
use crate::repository::{CourseworkRepository, InMemorySchoolRepository};
use chrono::{NaiveDate, NaiveDateTime, Utc};
use std::collections::BTreeMap;

pub struct Fixture {
    pub repo: InMemorySchoolRepository,
    pub teacher: i64,
    pub student: i64,
    pub course: i64,
}

pub fn ts(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
}

pub fn fixture() -> Fixture {
    let repo = InMemorySchoolRepository::new();
    let teacher = add_user(&repo, "teacher", Role::Teacher);
    let student = add_user(&repo, "student", Role::Student);
    let classroom = repo.insert_classroom("一班").unwrap();
    let course = repo
        .insert_course(&NewCourse {
            title: "代数".to_string(),
            description: None,
            teacher_id: teacher,
            classroom_id: classroom,
            fee: 200.0,
            start_date: NaiveDate::from_ymd_opt(2025, 1, 6),
            end_date: None,
            published: true,
        })
        .unwrap();
    repo.enroll_student(student, course).unwrap();
    Fixture {
        repo,
        teacher,
        student,
        course,
    }
}

pub fn add_user(repo: &InMemorySchoolRepository, name: &str, role: Role) -> i64 {
    repo.insert_user(&NewUser {
        name: name.to_string(),
        email: format!("{}@school.test", name),
        role,
    })
    .unwrap()
}

impl Fixture {
    /// 新建作业，题目分值由 `points` 给出；返回 (assignment_id, question_ids)
    pub fn assignment(&self, max_points: i64, points: &[i64]) -> (i64, Vec<i64>) {
        let assignment = self
            .repo
            .insert_assignment(
                self.teacher,
                &NewAssignment {
                    course_id: self.course,
                    title: "作业".to_string(),
                    description: None,
                    instructions: None,
                    due_date: ts("2025-02-01 23:59:00"),
                    max_points,
                    published: true,
                },
            )
            .unwrap();
        let questions = points
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let mut options = BTreeMap::new();
                options.insert("A".to_string(), "是".to_string());
                options.insert("B".to_string(), "否".to_string());
                self.repo
                    .insert_question(
                        assignment,
                        &NewQuestion {
                            question_text: format!("Q{}", i + 1),
                            options,
                            correct_answer: "A".to_string(),
                            points: *p,
                        },
                    )
                    .unwrap()
            })
            .collect();
        (assignment, questions)
    }

    /// 作答并（可选）评分
    pub fn answer(&self, assignment: i64, question: i64, score: Option<i64>) -> i64 {
        self.answer_as(self.student, assignment, question, score)
    }

    pub fn answer_as(
        &self,
        student: i64,
        assignment: i64,
        question: i64,
        score: Option<i64>,
    ) -> i64 {
        let answer = self
            .repo
            .upsert_answer(
                student,
                assignment,
                &AnswerSubmission {
                    question_id: question,
                    chosen_answer: "A".to_string(),
                },
                Utc::now().naive_utc(),
            )
            .unwrap();
        if let Some(score) = score {
            self.repo.set_answer_score(answer.id, score, None).unwrap();
        }
        answer.id
    }
}
