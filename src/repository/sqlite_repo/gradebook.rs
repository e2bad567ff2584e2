// ==========================================
// SqliteSchoolRepository - 进度与总评
// ==========================================
// upsert 采用"事务内先 UPDATE 后 INSERT"：
// 键中含可空列（assignment_id），依赖 schema 的部分唯一索引兜底并发插入
// ==========================================

use super::{conversion_error, count_from_row, group_column, SqliteSchoolRepository};
use crate::domain::{
    AggregateStat, GroupField, MetricSample, OverallGrade, ProgressStatus, StudentProgress,
};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::school_repo::GradebookRepository;
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension, Row};

const PROGRESS_COLUMNS: &str =
    "student_id, assignment_id, course_id, progress_percentage, status, updated_at";
const GRADE_COLUMNS: &str =
    "student_id, course_id, assignment_id, grade, letter_grade, remarks, created_at, updated_at";

fn map_progress(row: &Row) -> rusqlite::Result<StudentProgress> {
    let status: String = row.get(4)?;
    Ok(StudentProgress {
        student_id: row.get(0)?,
        assignment_id: row.get(1)?,
        course_id: row.get(2)?,
        progress_percentage: row.get(3)?,
        status: ProgressStatus::from_str(&status),
        updated_at: row.get(5)?,
    })
}

fn map_grade(row: &Row) -> rusqlite::Result<OverallGrade> {
    let grade: Option<f64> = row.get(3)?;
    Ok(OverallGrade {
        student_id: row.get(0)?,
        course_id: row.get(1)?,
        assignment_id: row.get(2)?,
        grade: grade.ok_or_else(|| conversion_error(3, "grade 为空"))?,
        letter_grade: row.get(4)?,
        remarks: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn query_progress(
    conn: &Connection,
    student_id: i64,
    assignment_id: Option<i64>,
    course_id: Option<i64>,
) -> rusqlite::Result<Option<StudentProgress>> {
    match assignment_id {
        Some(assignment_id) => conn
            .query_row(
                &format!(
                    "SELECT {} FROM student_progress WHERE student_id = ?1 AND assignment_id = ?2",
                    PROGRESS_COLUMNS
                ),
                params![student_id, assignment_id],
                map_progress,
            )
            .optional(),
        None => conn
            .query_row(
                &format!(
                    "SELECT {} FROM student_progress
                     WHERE student_id = ?1 AND assignment_id IS NULL AND course_id IS ?2",
                    PROGRESS_COLUMNS
                ),
                params![student_id, course_id],
                map_progress,
            )
            .optional(),
    }
}

fn query_grade(
    conn: &Connection,
    student_id: i64,
    course_id: i64,
    assignment_id: Option<i64>,
) -> rusqlite::Result<Option<OverallGrade>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM overall_grades
             WHERE student_id = ?1 AND course_id = ?2 AND assignment_id IS ?3",
            GRADE_COLUMNS
        ),
        params![student_id, course_id, assignment_id],
        map_grade,
    )
    .optional()
}

fn stats_by_course(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> RepositoryResult<Vec<(i64, AggregateStat)>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, |row| {
            let course_id: i64 = row.get(0)?;
            let sum: f64 = row.get(1)?;
            let count: i64 = row.get(2)?;
            Ok((course_id, AggregateStat::new(sum, count_from_row(count))))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

impl GradebookRepository for SqliteSchoolRepository {
    fn upsert_progress(&self, progress: &StudentProgress) -> RepositoryResult<StudentProgress> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let updated = match progress.assignment_id {
            Some(assignment_id) => tx.execute(
                r#"
                UPDATE student_progress
                SET course_id = ?3, progress_percentage = ?4, status = ?5, updated_at = ?6
                WHERE student_id = ?1 AND assignment_id = ?2
                "#,
                params![
                    progress.student_id,
                    assignment_id,
                    progress.course_id,
                    progress.progress_percentage,
                    progress.status.to_db_str(),
                    progress.updated_at,
                ],
            )?,
            None => tx.execute(
                r#"
                UPDATE student_progress
                SET progress_percentage = ?3, status = ?4, updated_at = ?5
                WHERE student_id = ?1 AND assignment_id IS NULL AND course_id IS ?2
                "#,
                params![
                    progress.student_id,
                    progress.course_id,
                    progress.progress_percentage,
                    progress.status.to_db_str(),
                    progress.updated_at,
                ],
            )?,
        };

        if updated == 0 {
            tx.execute(
                r#"
                INSERT INTO student_progress (
                    student_id, assignment_id, course_id, progress_percentage, status, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    progress.student_id,
                    progress.assignment_id,
                    progress.course_id,
                    progress.progress_percentage,
                    progress.status.to_db_str(),
                    progress.updated_at,
                ],
            )?;
        }

        let stored = query_progress(
            &tx,
            progress.student_id,
            progress.assignment_id,
            progress.course_id,
        )?
        .ok_or_else(|| RepositoryError::not_found("StudentProgress", progress.student_id))?;
        tx.commit()?;
        Ok(stored)
    }

    fn find_progress(
        &self,
        student_id: i64,
        assignment_id: i64,
    ) -> RepositoryResult<Option<StudentProgress>> {
        let conn = self.get_conn()?;
        Ok(query_progress(&conn, student_id, Some(assignment_id), None)?)
    }

    fn list_progress_by_student(&self, student_id: i64) -> RepositoryResult<Vec<StudentProgress>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM student_progress WHERE student_id = ?1
             ORDER BY updated_at DESC, id DESC",
            PROGRESS_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![student_id], map_progress)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn upsert_grade(&self, grade: &OverallGrade) -> RepositoryResult<OverallGrade> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        // created_at 只在首次插入时写入
        let updated = tx.execute(
            r#"
            UPDATE overall_grades
            SET grade = ?4, letter_grade = ?5, remarks = ?6, updated_at = ?7
            WHERE student_id = ?1 AND course_id = ?2 AND assignment_id IS ?3
            "#,
            params![
                grade.student_id,
                grade.course_id,
                grade.assignment_id,
                grade.grade,
                grade.letter_grade,
                grade.remarks,
                grade.updated_at,
            ],
        )?;

        if updated == 0 {
            tx.execute(
                r#"
                INSERT INTO overall_grades (
                    student_id, course_id, assignment_id, grade,
                    letter_grade, remarks, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
                params![
                    grade.student_id,
                    grade.course_id,
                    grade.assignment_id,
                    grade.grade,
                    grade.letter_grade,
                    grade.remarks,
                    grade.created_at,
                    grade.updated_at,
                ],
            )?;
        }

        let stored = query_grade(&tx, grade.student_id, grade.course_id, grade.assignment_id)?
            .ok_or_else(|| RepositoryError::not_found("OverallGrade", grade.student_id))?;
        tx.commit()?;
        Ok(stored)
    }

    fn find_grade(
        &self,
        student_id: i64,
        course_id: i64,
        assignment_id: Option<i64>,
    ) -> RepositoryResult<Option<OverallGrade>> {
        let conn = self.get_conn()?;
        Ok(query_grade(&conn, student_id, course_id, assignment_id)?)
    }

    fn list_grades_by_student(&self, student_id: i64) -> RepositoryResult<Vec<OverallGrade>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM overall_grades
             WHERE student_id = ?1 AND grade IS NOT NULL
             ORDER BY course_id ASC, assignment_id ASC",
            GRADE_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![student_id], map_grade)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn list_course_graded_students(&self, course_id: i64) -> RepositoryResult<Vec<i64>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT student_id FROM overall_grades
             WHERE course_id = ?1 AND assignment_id IS NULL
             ORDER BY student_id ASC",
        )?;
        let ids = stmt
            .query_map(params![course_id], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(ids)
    }

    fn list_grades_by_assignment(&self, assignment_id: i64) -> RepositoryResult<Vec<OverallGrade>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM overall_grades
             WHERE assignment_id = ?1 AND grade IS NOT NULL
             ORDER BY student_id ASC",
            GRADE_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![assignment_id], map_grade)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn grade_stat(&self) -> RepositoryResult<AggregateStat> {
        let conn = self.get_conn()?;
        let (sum, count): (f64, i64) = conn.query_row(
            "SELECT COALESCE(SUM(grade), 0), COUNT(grade) FROM overall_grades",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(AggregateStat::new(sum, count_from_row(count)))
    }

    fn progress_stat(&self) -> RepositoryResult<AggregateStat> {
        let conn = self.get_conn()?;
        let (sum, count): (f64, i64) = conn.query_row(
            "SELECT COALESCE(SUM(progress_percentage), 0), COUNT(*) FROM student_progress",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(AggregateStat::new(sum, count_from_row(count)))
    }

    fn progress_stat_by_assignment(&self, assignment_id: i64) -> RepositoryResult<AggregateStat> {
        let conn = self.get_conn()?;
        let (sum, count): (f64, i64) = conn.query_row(
            "SELECT COALESCE(SUM(progress_percentage), 0), COUNT(*) FROM student_progress
             WHERE assignment_id = ?1",
            params![assignment_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(AggregateStat::new(sum, count_from_row(count)))
    }

    fn grade_stats_by_course(&self) -> RepositoryResult<Vec<(i64, AggregateStat)>> {
        let conn = self.get_conn()?;
        stats_by_course(
            &conn,
            "SELECT course_id, SUM(grade), COUNT(grade) FROM overall_grades
             WHERE grade IS NOT NULL
             GROUP BY course_id ORDER BY course_id ASC",
            [],
        )
    }

    fn progress_stats_by_course(
        &self,
        student_id: Option<i64>,
    ) -> RepositoryResult<Vec<(i64, AggregateStat)>> {
        let conn = self.get_conn()?;
        stats_by_course(
            &conn,
            "SELECT course_id, SUM(progress_percentage), COUNT(*) FROM student_progress
             WHERE course_id IS NOT NULL AND (?1 IS NULL OR student_id = ?1)
             GROUP BY course_id ORDER BY course_id ASC",
            params![student_id],
        )
    }

    fn grade_samples(&self, group_by: Option<GroupField>) -> RepositoryResult<Vec<MetricSample>> {
        let column = group_column(
            group_by,
            &[
                (GroupField::Course, "course_id"),
                (GroupField::Student, "student_id"),
            ],
        )?;
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT created_at, grade, {} FROM overall_grades WHERE grade IS NOT NULL",
            column
        ))?;
        let samples = stmt
            .query_map([], |row| {
                let created_at: NaiveDateTime = row.get(0)?;
                Ok(MetricSample {
                    date: created_at.date(),
                    value: row.get(1)?,
                    group_key: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(samples)
    }
}
