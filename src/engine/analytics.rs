// ==========================================
// 校务管理后端 - 统计分析引擎
// ==========================================
// 职责: 看板快照、周/月分桶序列、各类按课程汇总
// 分桶:
// - 周: ISO-8601（周一开始，年份取 ISO 周年）
// - 月: 自然月
// - 输出按 (group, year, period) 升序
// 红线: 只读；保留完整精度，四舍五入只在 API 层
// ==========================================

use crate::domain::{
    AggregateFn, AggregateStat, AssignmentProgress, AssignmentSummary, BucketQuery, BucketSeries,
    CourseAverage, CourseTotal, DashboardSnapshot, Granularity, MetricSample, Role, SalaryStatus,
    SalarySummary, TimeBucket,
};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::school_repo::{
    CourseworkRepository, GradebookRepository, LedgerRepository,
};
use chrono::{Datelike, NaiveDate};
use std::collections::BTreeMap;
use tracing::instrument;

/// 日期 → (year, period)
pub fn bucket_key(date: NaiveDate, granularity: Granularity) -> (i32, u32) {
    match granularity {
        Granularity::Week => {
            let week = date.iso_week();
            (week.year(), week.week())
        }
        Granularity::Month => (date.year(), date.month()),
    }
}

/// 将原始样本分桶聚合
///
/// # 参数
/// - `samples`: 仓储返回的样本
/// - `granularity`: 周/月
/// - `aggregate`: Sum 或 Avg
pub fn bucketize(
    samples: &[MetricSample],
    granularity: Granularity,
    aggregate: AggregateFn,
) -> Vec<TimeBucket> {
    // Option<i64> 的 Ord 令 None 排在最前，BTreeMap 即给出升序
    let mut grouped: BTreeMap<(Option<i64>, i32, u32), AggregateStat> = BTreeMap::new();
    for sample in samples {
        let (year, period) = bucket_key(sample.date, granularity);
        grouped
            .entry((sample.group_key, year, period))
            .or_default()
            .push(sample.value);
    }

    grouped
        .into_iter()
        .map(|((group, year, period), stat)| TimeBucket {
            group,
            year,
            period,
            aggregate: match aggregate {
                AggregateFn::Sum => stat.sum,
                AggregateFn::Avg => stat.average(),
            },
            count: stat.count,
        })
        .collect()
}

fn course_totals(rows: Vec<(i64, AggregateStat)>) -> Vec<CourseTotal> {
    rows.into_iter()
        .map(|(course_id, stat)| CourseTotal {
            course_id,
            total: stat.sum,
            count: stat.count,
        })
        .collect()
}

fn course_averages(rows: Vec<(i64, AggregateStat)>) -> Vec<CourseAverage> {
    rows.into_iter()
        .map(|(course_id, stat)| CourseAverage {
            course_id,
            average: stat.average(),
            count: stat.count,
        })
        .collect()
}

// ==========================================
// AnalyticsAggregator
// ==========================================
pub struct AnalyticsAggregator {
    // 无状态引擎
}

impl Default for AnalyticsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalyticsAggregator {
    pub fn new() -> Self {
        Self {}
    }

    /// 计算分桶序列
    ///
    /// # 返回
    /// - Err(ValidationError): 序列不支持该分组字段
    #[instrument(skip(self, repo), fields(series = ?query.series, granularity = %query.granularity))]
    pub fn compute_time_bucketed<R>(
        &self,
        repo: &R,
        query: &BucketQuery,
    ) -> RepositoryResult<Vec<TimeBucket>>
    where
        R: GradebookRepository + LedgerRepository + ?Sized,
    {
        if let Some(group) = query.group_by {
            if !query.series.supports_group(group) {
                return Err(RepositoryError::ValidationError(format!(
                    "序列 {:?} 不支持按 {:?} 分组",
                    query.series, group
                )));
            }
        }

        let samples = match query.series {
            BucketSeries::TeacherSalary => repo.salary_samples(query.group_by)?,
            BucketSeries::CourseFee => repo.fee_samples(query.group_by)?,
            BucketSeries::OverallGrade => repo.grade_samples(query.group_by)?,
        };
        let buckets = bucketize(&samples, query.granularity, query.series.aggregate_fn());

        tracing::debug!(
            date_field = query.series.date_field(),
            metric_field = query.series.metric_field(),
            samples = samples.len(),
            buckets = buckets.len(),
            "分桶完成"
        );
        Ok(buckets)
    }

    /// 管理员看板快照（原始精度）
    #[instrument(skip(self, repo))]
    pub fn compute_dashboard<R>(&self, repo: &R) -> RepositoryResult<DashboardSnapshot>
    where
        R: CourseworkRepository + GradebookRepository + LedgerRepository + ?Sized,
    {
        let series = |s: BucketSeries, g: Granularity| {
            self.compute_time_bucketed(repo, &BucketQuery::new(s, g))
        };

        Ok(DashboardSnapshot {
            total_users: repo.count_users()?,
            total_admins: repo.count_users_by_role(Role::Admin)?,
            total_teachers: repo.count_users_by_role(Role::Teacher)?,
            total_students: repo.count_users_by_role(Role::Student)?,
            total_courses: repo.count_courses()?,
            total_assignments: repo.count_assignments()?,
            average_grade: repo.grade_stat()?.average(),
            average_progress: repo.progress_stat()?.average(),
            total_paid_salaries: repo.salary_stat(Some(SalaryStatus::Paid), None)?.sum,
            total_course_fees: repo.fee_stat()?.sum,
            teacher_weekly: series(BucketSeries::TeacherSalary, Granularity::Week)?,
            teacher_monthly: series(BucketSeries::TeacherSalary, Granularity::Month)?,
            student_fee_weekly: series(BucketSeries::CourseFee, Granularity::Week)?,
            student_fee_monthly: series(BucketSeries::CourseFee, Granularity::Month)?,
            student_weekly: series(BucketSeries::OverallGrade, Granularity::Week)?,
            student_monthly: series(BucketSeries::OverallGrade, Granularity::Month)?,
        })
    }

    /// 作业提交统计（未评分的作答不计入平均分）
    pub fn assignment_summary<R>(
        &self,
        repo: &R,
        assignment_id: i64,
    ) -> RepositoryResult<AssignmentSummary>
    where
        R: CourseworkRepository + ?Sized,
    {
        let assignment = repo
            .find_assignment(assignment_id)?
            .ok_or_else(|| RepositoryError::not_found("Assignment", assignment_id))?;
        let (submission_count, scores) = repo.answer_score_stat(assignment_id)?;
        Ok(AssignmentSummary {
            assignment_id,
            title: assignment.title,
            submission_count,
            graded_count: scores.count,
            average_score: scores.average(),
        })
    }

    /// 教师名下各作业的平均进度与作答数（按截止时间升序）
    #[instrument(skip(self, repo))]
    pub fn assignment_progress_by_teacher<R>(
        &self,
        repo: &R,
        teacher_id: i64,
    ) -> RepositoryResult<Vec<AssignmentProgress>>
    where
        R: CourseworkRepository + GradebookRepository + ?Sized,
    {
        let assignments = repo.list_assignments_by_teacher(teacher_id)?;
        let mut rows = Vec::with_capacity(assignments.len());
        for assignment in assignments {
            let progress = repo.progress_stat_by_assignment(assignment.id)?;
            let (submission_count, _) = repo.answer_score_stat(assignment.id)?;
            rows.push(AssignmentProgress {
                assignment_id: assignment.id,
                title: assignment.title,
                avg_progress: progress.average(),
                submission_count,
            });
        }
        Ok(rows)
    }

    /// 工资汇总，可限定教师
    pub fn salary_summary<R>(
        &self,
        repo: &R,
        teacher_id: Option<i64>,
    ) -> RepositoryResult<SalarySummary>
    where
        R: LedgerRepository + ?Sized,
    {
        let paid = repo.salary_stat(Some(SalaryStatus::Paid), teacher_id)?;
        let all = repo.salary_stat(None, teacher_id)?;
        let pending = repo.salary_stat(Some(SalaryStatus::Pending), teacher_id)?;
        Ok(SalarySummary {
            total_paid: paid.sum,
            average_salary: all.average(),
            pending_payments: pending.count,
        })
    }

    pub fn fee_totals_by_course<R>(&self, repo: &R) -> RepositoryResult<Vec<CourseTotal>>
    where
        R: LedgerRepository + ?Sized,
    {
        Ok(course_totals(repo.fee_stats_by_course()?))
    }

    /// 按课程的平均进度；给定学生时即该学生的进度图
    pub fn progress_by_course<R>(
        &self,
        repo: &R,
        student_id: Option<i64>,
    ) -> RepositoryResult<Vec<CourseAverage>>
    where
        R: GradebookRepository + ?Sized,
    {
        Ok(course_averages(repo.progress_stats_by_course(student_id)?))
    }

    pub fn grade_by_course<R>(&self, repo: &R) -> RepositoryResult<Vec<CourseAverage>>
    where
        R: GradebookRepository + ?Sized,
    {
        Ok(course_averages(repo.grade_stats_by_course()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{GroupField, NewCourseFeePayment, NewTeacherSalary, OverallGrade};
    use crate::engine::progress_calculator::ProgressCalculator;
    use crate::engine::test_fixtures::{add_user, fixture, ts};

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn sample(d: &str, value: f64) -> MetricSample {
        MetricSample {
            date: date(d),
            value,
            group_key: None,
        }
    }

    #[test]
    fn test_iso_week_bucketing() {
        let samples = vec![
            sample("2025-01-06", 10.0),
            sample("2025-01-08", 20.0),
            sample("2025-01-13", 5.0),
        ];
        let buckets = bucketize(&samples, Granularity::Week, AggregateFn::Sum);
        assert_eq!(buckets.len(), 2);
        assert_eq!((buckets[0].year, buckets[0].period), (2025, 2));
        assert_eq!(buckets[0].aggregate, 30.0);
        assert_eq!(buckets[0].count, 2);
        assert_eq!((buckets[1].year, buckets[1].period), (2025, 3));
        assert_eq!(buckets[1].count, 1);
    }

    #[test]
    fn test_iso_week_year_boundary() {
        // 2024-12-30 属于 2025 年第 1 周；2021-01-01 属于 2020 年第 53 周
        assert_eq!(bucket_key(date("2024-12-30"), Granularity::Week), (2025, 1));
        assert_eq!(bucket_key(date("2021-01-01"), Granularity::Week), (2020, 53));
        assert_eq!(bucket_key(date("2021-01-01"), Granularity::Month), (2021, 1));
    }

    #[test]
    fn test_average_buckets_and_ordering() {
        let samples = vec![
            MetricSample {
                date: date("2025-02-03"),
                value: 80.0,
                group_key: Some(2),
            },
            MetricSample {
                date: date("2025-01-10"),
                value: 60.0,
                group_key: Some(2),
            },
            MetricSample {
                date: date("2025-01-20"),
                value: 100.0,
                group_key: Some(1),
            },
            MetricSample {
                date: date("2025-01-21"),
                value: 50.0,
                group_key: Some(1),
            },
        ];
        let buckets = bucketize(&samples, Granularity::Month, AggregateFn::Avg);
        let keys: Vec<_> = buckets
            .iter()
            .map(|b| (b.group, b.year, b.period))
            .collect();
        assert_eq!(
            keys,
            vec![(Some(1), 2025, 1), (Some(2), 2025, 1), (Some(2), 2025, 2)]
        );
        assert_eq!(buckets[0].aggregate, 75.0);
        assert_eq!(buckets[0].count, 2);
    }

    #[test]
    fn test_empty_inputs_give_zero() {
        let fx = crate::engine::test_fixtures::fixture();
        let snapshot = AnalyticsAggregator::new()
            .compute_dashboard(&fx.repo)
            .unwrap();
        assert_eq!(snapshot.average_grade, 0.0);
        assert_eq!(snapshot.average_progress, 0.0);
        assert_eq!(snapshot.total_paid_salaries, 0.0);
        assert!(snapshot.teacher_weekly.is_empty());
        assert!(bucketize(&[], Granularity::Week, AggregateFn::Avg).is_empty());
    }

    #[test]
    fn test_dashboard_counts_and_series() {
        let fx = fixture();
        fx.assignment(10, &[5, 5]);
        for (d, status) in [("2025-01-06", SalaryStatus::Paid), ("2025-01-13", SalaryStatus::Pending)] {
            fx.repo
                .insert_salary(&NewTeacherSalary {
                    teacher_id: fx.teacher,
                    salary_amount: 1000.0,
                    pay_date: date(d),
                    status,
                    remarks: None,
                })
                .unwrap();
        }
        fx.repo
            .insert_fee_payment(&NewCourseFeePayment {
                course_id: fx.course,
                student_id: fx.student,
                amount: 200.0,
                payment_date: ts("2025-01-08 10:00:00"),
                payment_method: None,
                transaction_id: None,
                remarks: None,
            })
            .unwrap();
        for (created, grade) in [("2025-01-06 09:00:00", 80.0), ("2025-01-08 09:00:00", 90.0)] {
            fx.repo
                .insert_grade_raw(OverallGrade {
                    student_id: fx.student,
                    course_id: fx.course,
                    assignment_id: None,
                    grade,
                    letter_grade: None,
                    remarks: None,
                    created_at: ts(created),
                    updated_at: ts(created),
                })
                .unwrap();
        }

        let snapshot = AnalyticsAggregator::new()
            .compute_dashboard(&fx.repo)
            .unwrap();
        assert_eq!(snapshot.total_users, 2);
        assert_eq!(snapshot.total_teachers, 1);
        assert_eq!(snapshot.total_students, 1);
        assert_eq!(snapshot.total_admins, 0);
        assert_eq!(snapshot.total_courses, 1);
        assert_eq!(snapshot.total_assignments, 1);
        assert_eq!(snapshot.total_paid_salaries, 1000.0);
        assert_eq!(snapshot.total_course_fees, 200.0);
        assert_eq!(snapshot.average_grade, 85.0);

        assert_eq!(snapshot.teacher_weekly.len(), 2);
        assert_eq!(snapshot.teacher_monthly.len(), 1);
        assert_eq!(snapshot.teacher_monthly[0].aggregate, 2000.0);
        assert_eq!(snapshot.student_fee_weekly[0].period, 2);
        assert_eq!(snapshot.student_weekly.len(), 1);
        assert_eq!(snapshot.student_weekly[0].aggregate, 85.0);
        assert_eq!(snapshot.student_weekly[0].count, 2);
    }

    #[test]
    fn test_grouped_series_validation() {
        let fx = fixture();
        let agg = AnalyticsAggregator::new();
        let bad = BucketQuery::new(BucketSeries::TeacherSalary, Granularity::Week)
            .grouped_by(GroupField::Student);
        assert!(matches!(
            agg.compute_time_bucketed(&fx.repo, &bad).unwrap_err(),
            RepositoryError::ValidationError(_)
        ));

        let ok = BucketQuery::new(BucketSeries::CourseFee, Granularity::Month)
            .grouped_by(GroupField::Course);
        assert!(agg.compute_time_bucketed(&fx.repo, &ok).unwrap().is_empty());
    }

    #[test]
    fn test_assignment_summary_ignores_ungraded() {
        let fx = fixture();
        let (assignment, questions) = fx.assignment(10, &[5, 5, 5]);
        fx.answer(assignment, questions[0], Some(4));
        fx.answer(assignment, questions[1], Some(2));
        fx.answer(assignment, questions[2], None);

        let summary = AnalyticsAggregator::new()
            .assignment_summary(&fx.repo, assignment)
            .unwrap();
        assert_eq!(summary.submission_count, 3);
        assert_eq!(summary.graded_count, 2);
        assert_eq!(summary.average_score, 3.0);
    }

    #[test]
    fn test_assignment_progress_by_teacher() {
        let fx = fixture();
        let (answered, questions) = fx.assignment(10, &[5, 5]);
        let (untouched, _) = fx.assignment(10, &[10]);
        let other = add_user(&fx.repo, "classmate", Role::Student);
        fx.answer(answered, questions[0], None);
        fx.answer_as(other, answered, questions[0], None);
        fx.answer_as(other, answered, questions[1], None);
        let calc = ProgressCalculator::new();
        calc.compute_assignment_progress(&fx.repo, answered, fx.student)
            .unwrap();
        calc.compute_assignment_progress(&fx.repo, answered, other)
            .unwrap();

        let rows = AnalyticsAggregator::new()
            .assignment_progress_by_teacher(&fx.repo, fx.teacher)
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].assignment_id, answered);
        assert_eq!(rows[0].avg_progress, 75.0);
        assert_eq!(rows[0].submission_count, 3);
        assert_eq!(rows[1].assignment_id, untouched);
        assert_eq!(rows[1].avg_progress, 0.0);
        assert_eq!(rows[1].submission_count, 0);

        let stranger = add_user(&fx.repo, "stranger", Role::Teacher);
        assert!(AnalyticsAggregator::new()
            .assignment_progress_by_teacher(&fx.repo, stranger)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_salary_summary_for_teacher() {
        let fx = fixture();
        for (amount, status) in [(1000.0, SalaryStatus::Paid), (2000.0, SalaryStatus::Pending)] {
            fx.repo
                .insert_salary(&NewTeacherSalary {
                    teacher_id: fx.teacher,
                    salary_amount: amount,
                    pay_date: date("2025-01-31"),
                    status,
                    remarks: None,
                })
                .unwrap();
        }
        let summary = AnalyticsAggregator::new()
            .salary_summary(&fx.repo, Some(fx.teacher))
            .unwrap();
        assert_eq!(summary.total_paid, 1000.0);
        assert_eq!(summary.average_salary, 1500.0);
        assert_eq!(summary.pending_payments, 1);
    }
}
