// ==========================================
// 校务管理后端 - 成绩汇总引擎
// ==========================================
// 课程总评:
// - total_score = Σ 各作业得分（未评分按 0 计）
// - total_max   = Σ 各作业 max_points（无论是否提交）
// - grade = total_max > 0 ? total_score / total_max * 100 : 0
// 作业成绩:
// - grade = Σ 得分 / max_points * 100（max_points 为 0 时为 0）
// ==========================================
// 红线: 不写 letter_grade；重算只覆盖 grade / updated_at
// ==========================================

use crate::domain::OverallGrade;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::school_repo::{CourseworkRepository, GradebookRepository};
use chrono::Utc;
use tracing::instrument;

/// 得分百分比，分母为 0 时返回 0
pub fn grade_percentage(total_score: i64, total_max: i64) -> f64 {
    if total_max <= 0 {
        0.0
    } else {
        total_score as f64 / total_max as f64 * 100.0
    }
}

// ==========================================
// GradeAggregator
// ==========================================
pub struct GradeAggregator {
    // 无状态引擎
}

impl Default for GradeAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl GradeAggregator {
    pub fn new() -> Self {
        Self {}
    }

    /// 重算学生的课程总评并 upsert（键: student, course, NULL）
    ///
    /// # 返回
    /// - Err(NotFound): 课程或学生不存在
    #[instrument(skip(self, repo))]
    pub fn compute_overall_grade<R>(
        &self,
        repo: &R,
        course_id: i64,
        student_id: i64,
    ) -> RepositoryResult<OverallGrade>
    where
        R: CourseworkRepository + GradebookRepository + ?Sized,
    {
        if repo.find_course(course_id)?.is_none() {
            return Err(RepositoryError::not_found("Course", course_id));
        }
        if repo.find_user(student_id)?.is_none() {
            return Err(RepositoryError::not_found("User", student_id));
        }

        let mut total_score: i64 = 0;
        let mut total_max: i64 = 0;
        for assignment in repo.list_assignments_by_course(course_id, false)? {
            total_score += repo.sum_answer_scores(assignment.id, student_id)?;
            total_max += assignment.max_points;
        }
        let grade = grade_percentage(total_score, total_max);

        tracing::debug!(course_id, student_id, total_score, total_max, grade, "课程总评已计算");

        self.store(repo, student_id, course_id, None, grade)
    }

    /// 重算学生在单个作业上的成绩并 upsert（键: student, course, assignment）
    #[instrument(skip(self, repo))]
    pub fn compute_assignment_grade<R>(
        &self,
        repo: &R,
        assignment_id: i64,
        student_id: i64,
    ) -> RepositoryResult<OverallGrade>
    where
        R: CourseworkRepository + GradebookRepository + ?Sized,
    {
        let assignment = repo
            .find_assignment(assignment_id)?
            .ok_or_else(|| RepositoryError::not_found("Assignment", assignment_id))?;
        if repo.find_user(student_id)?.is_none() {
            return Err(RepositoryError::not_found("User", student_id));
        }

        let total_score = repo.sum_answer_scores(assignment_id, student_id)?;
        let grade = grade_percentage(total_score, assignment.max_points);

        self.store(
            repo,
            student_id,
            assignment.course_id,
            Some(assignment_id),
            grade,
        )
    }

    /// 为所有在该作业上有作答的学生重算作业成绩
    ///
    /// # 返回
    /// 重算的学生数
    #[instrument(skip(self, repo))]
    pub fn recalculate_assignment_grades<R>(
        &self,
        repo: &R,
        assignment_id: i64,
    ) -> RepositoryResult<usize>
    where
        R: CourseworkRepository + GradebookRepository + ?Sized,
    {
        if repo.find_assignment(assignment_id)?.is_none() {
            return Err(RepositoryError::not_found("Assignment", assignment_id));
        }
        let students = repo.list_answering_students(assignment_id)?;
        for student_id in &students {
            self.compute_assignment_grade(repo, assignment_id, *student_id)?;
        }
        tracing::info!(assignment_id, count = students.len(), "作业成绩已重算");
        Ok(students.len())
    }

    fn store<R>(
        &self,
        repo: &R,
        student_id: i64,
        course_id: i64,
        assignment_id: Option<i64>,
        grade: f64,
    ) -> RepositoryResult<OverallGrade>
    where
        R: GradebookRepository + ?Sized,
    {
        let now = Utc::now().naive_utc();
        // 已存在时保留原 letter_grade / remarks
        let existing = repo.find_grade(student_id, course_id, assignment_id)?;
        repo.upsert_grade(&OverallGrade {
            student_id,
            course_id,
            assignment_id,
            grade,
            letter_grade: existing.as_ref().and_then(|g| g.letter_grade.clone()),
            remarks: existing.and_then(|g| g.remarks),
            created_at: now,
            updated_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_fixtures::fixture;

    #[test]
    fn test_grade_percentage_zero_denominator() {
        assert_eq!(grade_percentage(0, 0), 0.0);
        assert_eq!(grade_percentage(5, 0), 0.0);
        assert_eq!(grade_percentage(15, 20), 75.0);
    }

    #[test]
    fn test_full_marks_single_assignment() {
        let fx = fixture();
        let (assignment, questions) = fx.assignment(10, &[5, 5]);
        for q in &questions {
            fx.answer(assignment, *q, Some(5));
        }

        let grade = GradeAggregator::new()
            .compute_overall_grade(&fx.repo, fx.course, fx.student)
            .unwrap();
        assert_eq!(grade.grade, 100.0);
        assert_eq!(grade.assignment_id, None);
        assert!(grade.letter_grade.is_none());
    }

    #[test]
    fn test_unsubmitted_assignment_counts_toward_max() {
        let fx = fixture();
        let (a1, q1) = fx.assignment(10, &[5, 5]);
        let (_a2, _) = fx.assignment(10, &[10]);
        fx.answer(a1, q1[0], Some(5));
        fx.answer(a1, q1[1], Some(5));

        let grade = GradeAggregator::new()
            .compute_overall_grade(&fx.repo, fx.course, fx.student)
            .unwrap();
        assert_eq!(grade.grade, 50.0);
    }

    #[test]
    fn test_ungraded_answers_count_as_zero() {
        let fx = fixture();
        let (assignment, questions) = fx.assignment(20, &[5, 5, 5, 5]);
        fx.answer(assignment, questions[0], Some(5));
        fx.answer(assignment, questions[1], None);

        let grade = GradeAggregator::new()
            .compute_overall_grade(&fx.repo, fx.course, fx.student)
            .unwrap();
        assert_eq!(grade.grade, 25.0);
    }

    #[test]
    fn test_course_without_assignments_is_zero() {
        let fx = fixture();
        let grade = GradeAggregator::new()
            .compute_overall_grade(&fx.repo, fx.course, fx.student)
            .unwrap();
        assert_eq!(grade.grade, 0.0);
    }

    #[test]
    fn test_recompute_idempotent_and_keeps_created_at() {
        let fx = fixture();
        let (assignment, questions) = fx.assignment(10, &[10]);
        fx.answer(assignment, questions[0], Some(7));

        let agg = GradeAggregator::new();
        let first = agg
            .compute_overall_grade(&fx.repo, fx.course, fx.student)
            .unwrap();
        let second = agg
            .compute_overall_grade(&fx.repo, fx.course, fx.student)
            .unwrap();
        assert_eq!(first.grade, second.grade);
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(fx.repo.list_grades_by_student(fx.student).unwrap().len(), 1);
    }

    #[test]
    fn test_missing_course_or_student_is_not_found() {
        let fx = fixture();
        let agg = GradeAggregator::new();
        assert!(agg
            .compute_overall_grade(&fx.repo, 9_999, fx.student)
            .unwrap_err()
            .is_not_found());
        assert!(agg
            .compute_overall_grade(&fx.repo, fx.course, 9_999)
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_assignment_grade_and_recalculate() {
        let fx = fixture();
        let (assignment, questions) = fx.assignment(10, &[5, 5]);
        let other = crate::engine::test_fixtures::add_user(
            &fx.repo,
            "other",
            crate::domain::Role::Student,
        );
        fx.answer(assignment, questions[0], Some(5));
        fx.answer_as(other, assignment, questions[0], Some(2));
        fx.answer_as(other, assignment, questions[1], Some(3));

        let agg = GradeAggregator::new();
        let single = agg
            .compute_assignment_grade(&fx.repo, assignment, fx.student)
            .unwrap();
        assert_eq!(single.grade, 50.0);
        assert_eq!(single.assignment_id, Some(assignment));

        assert_eq!(agg.recalculate_assignment_grades(&fx.repo, assignment).unwrap(), 2);
        let rows = fx.repo.list_grades_by_assignment(assignment).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].grade, 50.0);
    }

    #[test]
    fn test_zero_max_points_with_scores_is_zero() {
        let fx = fixture();
        let (assignment, questions) = fx.assignment(0, &[5]);
        fx.answer(assignment, questions[0], Some(5));

        let grade = GradeAggregator::new()
            .compute_assignment_grade(&fx.repo, assignment, fx.student)
            .unwrap();
        assert_eq!(grade.grade, 0.0);
    }
}
