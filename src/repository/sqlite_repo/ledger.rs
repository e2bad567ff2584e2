// ==========================================
// SqliteSchoolRepository - 工资与学费流水
// ==========================================

use super::{count_from_row, group_column, SqliteSchoolRepository};
use crate::domain::{
    AggregateStat, CourseFeePayment, GroupField, MetricSample, NewCourseFeePayment,
    NewTeacherSalary, SalaryStatus, TeacherSalary,
};
use crate::repository::error::RepositoryResult;
use crate::repository::school_repo::LedgerRepository;
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, Row};

fn map_salary(row: &Row) -> rusqlite::Result<TeacherSalary> {
    let status: String = row.get(4)?;
    Ok(TeacherSalary {
        id: row.get(0)?,
        teacher_id: row.get(1)?,
        salary_amount: row.get(2)?,
        pay_date: row.get(3)?,
        status: SalaryStatus::from_str(&status),
        remarks: row.get(5)?,
    })
}

fn map_payment(row: &Row) -> rusqlite::Result<CourseFeePayment> {
    Ok(CourseFeePayment {
        id: row.get(0)?,
        course_id: row.get(1)?,
        student_id: row.get(2)?,
        amount: row.get(3)?,
        payment_date: row.get(4)?,
        payment_method: row.get(5)?,
        transaction_id: row.get(6)?,
        remarks: row.get(7)?,
    })
}

impl LedgerRepository for SqliteSchoolRepository {
    fn insert_salary(&self, salary: &NewTeacherSalary) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO teacher_salaries (teacher_id, salary_amount, pay_date, status, remarks)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                salary.teacher_id,
                salary.salary_amount,
                salary.pay_date,
                salary.status.to_db_str(),
                salary.remarks,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn list_salaries(&self, teacher_id: Option<i64>) -> RepositoryResult<Vec<TeacherSalary>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, teacher_id, salary_amount, pay_date, status, remarks
            FROM teacher_salaries
            WHERE (?1 IS NULL OR teacher_id = ?1)
            ORDER BY pay_date DESC, id DESC
            "#,
        )?;
        let rows = stmt
            .query_map(params![teacher_id], map_salary)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn salary_stat(
        &self,
        status: Option<SalaryStatus>,
        teacher_id: Option<i64>,
    ) -> RepositoryResult<AggregateStat> {
        let conn = self.get_conn()?;
        let (sum, count): (f64, i64) = conn.query_row(
            r#"
            SELECT COALESCE(SUM(salary_amount), 0), COUNT(*)
            FROM teacher_salaries
            WHERE (?1 IS NULL OR status = ?1) AND (?2 IS NULL OR teacher_id = ?2)
            "#,
            params![status.map(|s| s.to_db_str()), teacher_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(AggregateStat::new(sum, count_from_row(count)))
    }

    fn insert_fee_payment(&self, payment: &NewCourseFeePayment) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO course_fee_payments (
                course_id, student_id, amount, payment_date,
                payment_method, transaction_id, remarks
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                payment.course_id,
                payment.student_id,
                payment.amount,
                payment.payment_date,
                payment.payment_method,
                payment.transaction_id,
                payment.remarks,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn list_fee_payments(&self, student_id: Option<i64>) -> RepositoryResult<Vec<CourseFeePayment>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, course_id, student_id, amount, payment_date,
                   payment_method, transaction_id, remarks
            FROM course_fee_payments
            WHERE (?1 IS NULL OR student_id = ?1)
            ORDER BY payment_date DESC, id DESC
            "#,
        )?;
        let rows = stmt
            .query_map(params![student_id], map_payment)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn fee_stat(&self) -> RepositoryResult<AggregateStat> {
        let conn = self.get_conn()?;
        let (sum, count): (f64, i64) = conn.query_row(
            "SELECT COALESCE(SUM(amount), 0), COUNT(*) FROM course_fee_payments",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(AggregateStat::new(sum, count_from_row(count)))
    }

    fn fee_stats_by_course(&self) -> RepositoryResult<Vec<(i64, AggregateStat)>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT course_id, SUM(amount), COUNT(*) FROM course_fee_payments
             GROUP BY course_id ORDER BY course_id ASC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                let course_id: i64 = row.get(0)?;
                let sum: f64 = row.get(1)?;
                let count: i64 = row.get(2)?;
                Ok((course_id, AggregateStat::new(sum, count_from_row(count))))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn salary_samples(&self, group_by: Option<GroupField>) -> RepositoryResult<Vec<MetricSample>> {
        let column = group_column(group_by, &[(GroupField::Teacher, "teacher_id")])?;
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT pay_date, salary_amount, {} FROM teacher_salaries",
            column
        ))?;
        let samples = stmt
            .query_map([], |row| {
                let pay_date: NaiveDate = row.get(0)?;
                Ok(MetricSample {
                    date: pay_date,
                    value: row.get(1)?,
                    group_key: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(samples)
    }

    fn fee_samples(&self, group_by: Option<GroupField>) -> RepositoryResult<Vec<MetricSample>> {
        let column = group_column(
            group_by,
            &[
                (GroupField::Course, "course_id"),
                (GroupField::Student, "student_id"),
            ],
        )?;
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT payment_date, amount, {} FROM course_fee_payments",
            column
        ))?;
        let samples = stmt
            .query_map([], |row| {
                let payment_date: NaiveDateTime = row.get(0)?;
                Ok(MetricSample {
                    date: payment_date.date(),
                    value: row.get(1)?,
                    group_key: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(samples)
    }
}
