// ==========================================
// SqliteSchoolRepository - 用户/课程/作业/作答
// ==========================================

use super::{conversion_error, count_from_row, SqliteSchoolRepository};
use crate::domain::{
    AggregateStat, AnswerSubmission, Assignment, Classroom, Course, NewAssignment, NewCourse,
    NewQuestion, NewUser, Question, Role, StudentAnswer, User,
};
use crate::repository::error::RepositoryResult;
use crate::repository::school_repo::CourseworkRepository;
use chrono::{NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;

const USER_COLUMNS: &str = "id, name, email, role, created_at";
const COURSE_COLUMNS: &str =
    "id, title, description, teacher_id, classroom_id, fee, start_date, end_date, published";
const ASSIGNMENT_COLUMNS: &str =
    "id, course_id, teacher_id, title, description, instructions, due_date, max_points, published";
const QUESTION_COLUMNS: &str = "id, assignment_id, question_text, options, correct_answer, points";
const ANSWER_COLUMNS: &str =
    "id, student_id, assignment_id, question_id, chosen_answer, score, feedback, submitted_at";

// ==========================================
// 行映射
// ==========================================

fn map_user(row: &Row) -> rusqlite::Result<User> {
    let role_str: String = row.get(3)?;
    let role = Role::from_str(&role_str)
        .ok_or_else(|| conversion_error(3, format!("未知角色: {}", role_str)))?;
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        role,
        created_at: row.get(4)?,
    })
}

fn map_course(row: &Row) -> rusqlite::Result<Course> {
    Ok(Course {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        teacher_id: row.get(3)?,
        classroom_id: row.get(4)?,
        fee: row.get(5)?,
        start_date: row.get(6)?,
        end_date: row.get(7)?,
        published: row.get(8)?,
    })
}

fn map_assignment(row: &Row) -> rusqlite::Result<Assignment> {
    Ok(Assignment {
        id: row.get(0)?,
        course_id: row.get(1)?,
        teacher_id: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        instructions: row.get(5)?,
        due_date: row.get(6)?,
        max_points: row.get(7)?,
        published: row.get(8)?,
    })
}

fn map_question(row: &Row) -> rusqlite::Result<Question> {
    let options_json: String = row.get(3)?;
    let options: BTreeMap<String, String> = serde_json::from_str(&options_json)
        .map_err(|e| conversion_error(3, format!("选项 JSON 解析失败: {}", e)))?;
    Ok(Question {
        id: row.get(0)?,
        assignment_id: row.get(1)?,
        question_text: row.get(2)?,
        options,
        correct_answer: row.get(4)?,
        points: row.get(5)?,
    })
}

fn map_answer(row: &Row) -> rusqlite::Result<StudentAnswer> {
    Ok(StudentAnswer {
        id: row.get(0)?,
        student_id: row.get(1)?,
        assignment_id: row.get(2)?,
        question_id: row.get(3)?,
        chosen_answer: row.get(4)?,
        score: row.get(5)?,
        feedback: row.get(6)?,
        submitted_at: row.get(7)?,
    })
}

// ==========================================
// 连接级辅助（调用方已持有锁）
// ==========================================

fn query_answer(
    conn: &Connection,
    student_id: i64,
    assignment_id: i64,
    question_id: i64,
) -> rusqlite::Result<Option<StudentAnswer>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM student_answers
             WHERE student_id = ?1 AND assignment_id = ?2 AND question_id = ?3",
            ANSWER_COLUMNS
        ),
        params![student_id, assignment_id, question_id],
        map_answer,
    )
    .optional()
}

/// 删除作业及其子记录（子表 → 父表）
fn delete_assignment_rows(conn: &Connection, assignment_id: i64) -> rusqlite::Result<usize> {
    conn.execute(
        "DELETE FROM student_answers WHERE assignment_id = ?1",
        params![assignment_id],
    )?;
    conn.execute(
        "DELETE FROM student_progress WHERE assignment_id = ?1",
        params![assignment_id],
    )?;
    conn.execute(
        "DELETE FROM overall_grades WHERE assignment_id = ?1",
        params![assignment_id],
    )?;
    conn.execute(
        "DELETE FROM questions WHERE assignment_id = ?1",
        params![assignment_id],
    )?;
    conn.execute(
        "DELETE FROM assignments WHERE id = ?1",
        params![assignment_id],
    )
}

fn count_rows(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> rusqlite::Result<u64> {
    let n: i64 = conn.query_row(sql, params, |row| row.get(0))?;
    Ok(count_from_row(n))
}

impl CourseworkRepository for SqliteSchoolRepository {
    // ==========================================
    // 用户
    // ==========================================

    fn insert_user(&self, user: &NewUser) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO users (name, email, role, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                user.name,
                user.email,
                user.role.to_db_str(),
                Utc::now().naive_utc()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn find_user(&self, user_id: i64) -> RepositoryResult<Option<User>> {
        let conn = self.get_conn()?;
        let user = conn
            .query_row(
                &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
                params![user_id],
                map_user,
            )
            .optional()?;
        Ok(user)
    }

    fn list_users_by_role(&self, role: Role) -> RepositoryResult<Vec<User>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM users WHERE role = ?1 ORDER BY created_at DESC, id DESC",
            USER_COLUMNS
        ))?;
        let users = stmt
            .query_map(params![role.to_db_str()], map_user)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }

    fn count_users(&self) -> RepositoryResult<u64> {
        let conn = self.get_conn()?;
        Ok(count_rows(&conn, "SELECT COUNT(*) FROM users", [])?)
    }

    fn count_users_by_role(&self, role: Role) -> RepositoryResult<u64> {
        let conn = self.get_conn()?;
        Ok(count_rows(
            &conn,
            "SELECT COUNT(*) FROM users WHERE role = ?1",
            params![role.to_db_str()],
        )?)
    }

    fn update_user(&self, user: &User) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let updated = conn.execute(
            "UPDATE users SET name = ?2, email = ?3, role = ?4 WHERE id = ?1",
            params![user.id, user.name, user.email, user.role.to_db_str()],
        )?;
        Ok(updated > 0)
    }

    fn delete_user(&self, user_id: i64) -> RepositoryResult<bool> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        for sql in [
            "DELETE FROM student_answers WHERE student_id = ?1",
            "DELETE FROM student_progress WHERE student_id = ?1",
            "DELETE FROM overall_grades WHERE student_id = ?1",
            "DELETE FROM course_student WHERE student_id = ?1",
            "DELETE FROM course_fee_payments WHERE student_id = ?1",
            "DELETE FROM teacher_salaries WHERE teacher_id = ?1",
        ] {
            tx.execute(sql, params![user_id])?;
        }
        // 仍被课程/作业引用时由外键报错，事务回滚
        let deleted = tx.execute("DELETE FROM users WHERE id = ?1", params![user_id])?;
        tx.commit()?;
        Ok(deleted > 0)
    }

    // ==========================================
    // 班级 / 课程
    // ==========================================

    fn insert_classroom(&self, name: &str) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        conn.execute("INSERT INTO classrooms (name) VALUES (?1)", params![name])?;
        Ok(conn.last_insert_rowid())
    }

    fn find_classroom(&self, classroom_id: i64) -> RepositoryResult<Option<Classroom>> {
        let conn = self.get_conn()?;
        let classroom = conn
            .query_row(
                "SELECT id, name FROM classrooms WHERE id = ?1",
                params![classroom_id],
                |row| {
                    Ok(Classroom {
                        id: row.get(0)?,
                        name: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(classroom)
    }

    fn insert_course(&self, course: &NewCourse) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO courses (
                title, description, teacher_id, classroom_id,
                fee, start_date, end_date, published
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                course.title,
                course.description,
                course.teacher_id,
                course.classroom_id,
                course.fee,
                course.start_date,
                course.end_date,
                course.published,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn find_course(&self, course_id: i64) -> RepositoryResult<Option<Course>> {
        let conn = self.get_conn()?;
        let course = conn
            .query_row(
                &format!("SELECT {} FROM courses WHERE id = ?1", COURSE_COLUMNS),
                params![course_id],
                map_course,
            )
            .optional()?;
        Ok(course)
    }

    fn update_course(&self, course: &Course) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let updated = conn.execute(
            r#"
            UPDATE courses SET
                title = ?2, description = ?3, teacher_id = ?4, classroom_id = ?5,
                fee = ?6, start_date = ?7, end_date = ?8, published = ?9
            WHERE id = ?1
            "#,
            params![
                course.id,
                course.title,
                course.description,
                course.teacher_id,
                course.classroom_id,
                course.fee,
                course.start_date,
                course.end_date,
                course.published,
            ],
        )?;
        Ok(updated > 0)
    }

    fn list_courses(&self, published_only: bool) -> RepositoryResult<Vec<Course>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM courses
             WHERE (?1 = 0 OR published = 1)
             ORDER BY start_date ASC, id ASC",
            COURSE_COLUMNS
        ))?;
        let courses = stmt
            .query_map(params![published_only], map_course)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(courses)
    }

    fn count_courses(&self) -> RepositoryResult<u64> {
        let conn = self.get_conn()?;
        Ok(count_rows(&conn, "SELECT COUNT(*) FROM courses", [])?)
    }

    fn delete_course(&self, course_id: i64) -> RepositoryResult<bool> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let assignment_ids: Vec<i64> = {
            let mut stmt = tx.prepare("SELECT id FROM assignments WHERE course_id = ?1")?;
            let ids = stmt
                .query_map(params![course_id], |row| row.get(0))?
                .collect::<Result<Vec<i64>, _>>()?;
            ids
        };
        for assignment_id in assignment_ids {
            delete_assignment_rows(&tx, assignment_id)?;
        }

        for sql in [
            "DELETE FROM student_progress WHERE course_id = ?1",
            "DELETE FROM overall_grades WHERE course_id = ?1",
            "DELETE FROM course_student WHERE course_id = ?1",
            "DELETE FROM course_fee_payments WHERE course_id = ?1",
        ] {
            tx.execute(sql, params![course_id])?;
        }
        let deleted = tx.execute("DELETE FROM courses WHERE id = ?1", params![course_id])?;
        tx.commit()?;
        Ok(deleted > 0)
    }

    fn enroll_student(&self, student_id: i64, course_id: i64) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO course_student (student_id, course_id) VALUES (?1, ?2)",
            params![student_id, course_id],
        )?;
        Ok(())
    }

    fn is_enrolled(&self, student_id: i64, course_id: i64) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let n = count_rows(
            &conn,
            "SELECT COUNT(*) FROM course_student WHERE student_id = ?1 AND course_id = ?2",
            params![student_id, course_id],
        )?;
        Ok(n > 0)
    }

    // ==========================================
    // 作业
    // ==========================================

    fn insert_assignment(
        &self,
        teacher_id: i64,
        assignment: &NewAssignment,
    ) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO assignments (
                course_id, teacher_id, title, description, instructions,
                due_date, max_points, published
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                assignment.course_id,
                teacher_id,
                assignment.title,
                assignment.description,
                assignment.instructions,
                assignment.due_date,
                assignment.max_points,
                assignment.published,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn update_assignment(&self, assignment: &Assignment) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let updated = conn.execute(
            r#"
            UPDATE assignments SET
                course_id = ?2, title = ?3, description = ?4, instructions = ?5,
                due_date = ?6, max_points = ?7, published = ?8
            WHERE id = ?1
            "#,
            params![
                assignment.id,
                assignment.course_id,
                assignment.title,
                assignment.description,
                assignment.instructions,
                assignment.due_date,
                assignment.max_points,
                assignment.published,
            ],
        )?;
        Ok(updated > 0)
    }

    fn find_assignment(&self, assignment_id: i64) -> RepositoryResult<Option<Assignment>> {
        let conn = self.get_conn()?;
        let assignment = conn
            .query_row(
                &format!("SELECT {} FROM assignments WHERE id = ?1", ASSIGNMENT_COLUMNS),
                params![assignment_id],
                map_assignment,
            )
            .optional()?;
        Ok(assignment)
    }

    fn list_assignments_by_course(
        &self,
        course_id: i64,
        published_only: bool,
    ) -> RepositoryResult<Vec<Assignment>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM assignments
             WHERE course_id = ?1 AND (?2 = 0 OR published = 1)
             ORDER BY due_date ASC, id ASC",
            ASSIGNMENT_COLUMNS
        ))?;
        let assignments = stmt
            .query_map(params![course_id, published_only], map_assignment)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(assignments)
    }

    fn list_assignments_by_teacher(&self, teacher_id: i64) -> RepositoryResult<Vec<Assignment>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM assignments WHERE teacher_id = ?1 ORDER BY due_date ASC, id ASC",
            ASSIGNMENT_COLUMNS
        ))?;
        let assignments = stmt
            .query_map(params![teacher_id], map_assignment)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(assignments)
    }

    fn count_assignments(&self) -> RepositoryResult<u64> {
        let conn = self.get_conn()?;
        Ok(count_rows(&conn, "SELECT COUNT(*) FROM assignments", [])?)
    }

    fn delete_assignment(&self, assignment_id: i64) -> RepositoryResult<bool> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        let deleted = delete_assignment_rows(&tx, assignment_id)?;
        tx.commit()?;
        Ok(deleted > 0)
    }

    // ==========================================
    // 题目
    // ==========================================

    fn insert_question(
        &self,
        assignment_id: i64,
        question: &NewQuestion,
    ) -> RepositoryResult<i64> {
        let options_json = serde_json::to_string(&question.options)?;
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO questions (assignment_id, question_text, options, correct_answer, points)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                assignment_id,
                question.question_text,
                options_json,
                question.correct_answer,
                question.points,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn find_question(&self, question_id: i64) -> RepositoryResult<Option<Question>> {
        let conn = self.get_conn()?;
        let question = conn
            .query_row(
                &format!("SELECT {} FROM questions WHERE id = ?1", QUESTION_COLUMNS),
                params![question_id],
                map_question,
            )
            .optional()?;
        Ok(question)
    }

    fn list_questions(&self, assignment_id: i64) -> RepositoryResult<Vec<Question>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM questions WHERE assignment_id = ?1 ORDER BY id ASC",
            QUESTION_COLUMNS
        ))?;
        let questions = stmt
            .query_map(params![assignment_id], map_question)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(questions)
    }

    fn count_questions(&self, assignment_id: i64) -> RepositoryResult<u64> {
        let conn = self.get_conn()?;
        Ok(count_rows(
            &conn,
            "SELECT COUNT(*) FROM questions WHERE assignment_id = ?1",
            params![assignment_id],
        )?)
    }

    // ==========================================
    // 作答
    // ==========================================

    fn upsert_answer(
        &self,
        student_id: i64,
        assignment_id: i64,
        submission: &AnswerSubmission,
        submitted_at: NaiveDateTime,
    ) -> RepositoryResult<StudentAnswer> {
        let conn = self.get_conn()?;
        // score / feedback 不在 UPDATE 列表中，重复提交不会清掉评分
        conn.execute(
            r#"
            INSERT INTO student_answers (
                student_id, assignment_id, question_id, chosen_answer, submitted_at
            ) VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(student_id, assignment_id, question_id) DO UPDATE SET
                chosen_answer = excluded.chosen_answer,
                submitted_at = excluded.submitted_at
            "#,
            params![
                student_id,
                assignment_id,
                submission.question_id,
                submission.chosen_answer,
                submitted_at,
            ],
        )?;
        query_answer(&conn, student_id, assignment_id, submission.question_id)?.ok_or_else(|| {
            crate::repository::error::RepositoryError::not_found(
                "StudentAnswer",
                format!("{}/{}/{}", student_id, assignment_id, submission.question_id),
            )
        })
    }

    fn find_answer(
        &self,
        student_id: i64,
        assignment_id: i64,
        question_id: i64,
    ) -> RepositoryResult<Option<StudentAnswer>> {
        let conn = self.get_conn()?;
        Ok(query_answer(&conn, student_id, assignment_id, question_id)?)
    }

    fn list_answers(
        &self,
        assignment_id: i64,
        student_id: i64,
    ) -> RepositoryResult<Vec<StudentAnswer>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM student_answers
             WHERE assignment_id = ?1 AND student_id = ?2
             ORDER BY question_id ASC",
            ANSWER_COLUMNS
        ))?;
        let answers = stmt
            .query_map(params![assignment_id, student_id], map_answer)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(answers)
    }

    fn count_answered_questions(
        &self,
        assignment_id: i64,
        student_id: i64,
    ) -> RepositoryResult<u64> {
        let conn = self.get_conn()?;
        Ok(count_rows(
            &conn,
            "SELECT COUNT(DISTINCT question_id) FROM student_answers
             WHERE assignment_id = ?1 AND student_id = ?2",
            params![assignment_id, student_id],
        )?)
    }

    fn sum_answer_scores(&self, assignment_id: i64, student_id: i64) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let total: i64 = conn.query_row(
            "SELECT COALESCE(SUM(score), 0) FROM student_answers
             WHERE assignment_id = ?1 AND student_id = ?2",
            params![assignment_id, student_id],
            |row| row.get(0),
        )?;
        Ok(total)
    }

    fn set_answer_score(
        &self,
        answer_id: i64,
        score: i64,
        feedback: Option<&str>,
    ) -> RepositoryResult<bool> {
        let conn = self.get_conn()?;
        let updated = conn.execute(
            "UPDATE student_answers SET score = ?2, feedback = ?3 WHERE id = ?1",
            params![answer_id, score, feedback],
        )?;
        Ok(updated > 0)
    }

    fn find_answer_by_id(&self, answer_id: i64) -> RepositoryResult<Option<StudentAnswer>> {
        let conn = self.get_conn()?;
        let answer = conn
            .query_row(
                &format!("SELECT {} FROM student_answers WHERE id = ?1", ANSWER_COLUMNS),
                params![answer_id],
                map_answer,
            )
            .optional()?;
        Ok(answer)
    }

    fn answer_score_stat(&self, assignment_id: i64) -> RepositoryResult<(u64, AggregateStat)> {
        let conn = self.get_conn()?;
        let (rows, sum, graded): (i64, f64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(score), 0), COUNT(score)
             FROM student_answers WHERE assignment_id = ?1",
            params![assignment_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        Ok((
            count_from_row(rows),
            AggregateStat::new(sum, count_from_row(graded)),
        ))
    }

    fn list_answering_students(&self, assignment_id: i64) -> RepositoryResult<Vec<i64>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT student_id FROM student_answers
             WHERE assignment_id = ?1 ORDER BY student_id ASC",
        )?;
        let ids = stmt
            .query_map(params![assignment_id], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(ids)
    }
}
