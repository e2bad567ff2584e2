// ==========================================
// 校务管理后端 - 作业进度计算引擎
// ==========================================
// 规则:
// - total = 作业题目数, answered = 学生已作答的不同题目数
// - pct = total > 0 ? answered / total * 100 : 0
// - pct == 100 → completed; pct > 0 → in_progress; 否则按配置（默认 not_started）
// ==========================================
// 红线: 引擎不拼 SQL，只经由仓储接口读写
// ==========================================

use crate::domain::{ProgressStatus, StudentProgress};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::school_repo::{CourseworkRepository, GradebookRepository};
use chrono::Utc;
use tracing::instrument;

/// 由题目数与作答数推导进度与状态
///
/// # 参数
/// - `total`: 作业题目总数
/// - `answered`: 已作答的不同题目数
/// - `zero_status`: 0% 时使用的状态
pub fn derive_progress(
    total: u64,
    answered: u64,
    zero_status: ProgressStatus,
) -> (f64, ProgressStatus) {
    if total == 0 {
        return (0.0, zero_status);
    }
    let answered = answered.min(total);
    let pct = answered as f64 / total as f64 * 100.0;
    let status = if answered == total {
        ProgressStatus::Completed
    } else if answered > 0 {
        ProgressStatus::InProgress
    } else {
        zero_status
    };
    (pct, status)
}

// ==========================================
// ProgressCalculator
// ==========================================
pub struct ProgressCalculator {
    zero_progress_status: ProgressStatus,
}

impl Default for ProgressCalculator {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressCalculator {
    pub fn new() -> Self {
        Self {
            zero_progress_status: ProgressStatus::NotStarted,
        }
    }

    /// 指定 0% 进度对应的状态（兼容旧版的 in_progress）
    pub fn with_zero_progress_status(mut self, status: ProgressStatus) -> Self {
        self.zero_progress_status = status;
        self
    }

    /// 重算学生在作业上的进度并 upsert
    ///
    /// # 返回
    /// - Ok(StudentProgress): 已落库的进度
    /// - Err(NotFound): 作业或学生不存在
    #[instrument(skip(self, repo))]
    pub fn compute_assignment_progress<R>(
        &self,
        repo: &R,
        assignment_id: i64,
        student_id: i64,
    ) -> RepositoryResult<StudentProgress>
    where
        R: CourseworkRepository + GradebookRepository + ?Sized,
    {
        let assignment = repo
            .find_assignment(assignment_id)?
            .ok_or_else(|| RepositoryError::not_found("Assignment", assignment_id))?;
        if repo.find_user(student_id)?.is_none() {
            return Err(RepositoryError::not_found("User", student_id));
        }

        let total = repo.count_questions(assignment_id)?;
        let answered = repo.count_answered_questions(assignment_id, student_id)?;
        let (pct, status) = derive_progress(total, answered, self.zero_progress_status);

        tracing::debug!(
            assignment_id,
            student_id,
            total,
            answered,
            pct,
            status = %status,
            "进度已计算"
        );

        repo.upsert_progress(&StudentProgress {
            student_id,
            assignment_id: Some(assignment_id),
            course_id: Some(assignment.course_id),
            progress_percentage: pct,
            status,
            updated_at: Utc::now().naive_utc(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_fixtures::fixture;
    use crate::repository::InjectedFault;

    #[test]
    fn test_derive_progress_k_of_n() {
        for n in 1..=6u64 {
            for k in 0..=n {
                let (pct, status) = derive_progress(n, k, ProgressStatus::NotStarted);
                assert!((pct - k as f64 / n as f64 * 100.0).abs() < 1e-9);
                let expected = if k == n {
                    ProgressStatus::Completed
                } else if k > 0 {
                    ProgressStatus::InProgress
                } else {
                    ProgressStatus::NotStarted
                };
                assert_eq!(status, expected);
            }
        }
    }

    #[test]
    fn test_derive_progress_zero_questions() {
        let (pct, status) = derive_progress(0, 0, ProgressStatus::NotStarted);
        assert_eq!(pct, 0.0);
        assert_eq!(status, ProgressStatus::NotStarted);

        let (_, legacy) = derive_progress(4, 0, ProgressStatus::InProgress);
        assert_eq!(legacy, ProgressStatus::InProgress);
    }

    #[test]
    fn test_all_answered_is_completed() {
        let fx = fixture();
        let (assignment, questions) = fx.assignment(10, &[5, 5]);
        for q in &questions {
            fx.answer(assignment, *q, None);
        }

        let progress = ProgressCalculator::new()
            .compute_assignment_progress(&fx.repo, assignment, fx.student)
            .unwrap();
        assert_eq!(progress.progress_percentage, 100.0);
        assert_eq!(progress.status, ProgressStatus::Completed);
        assert_eq!(progress.course_id, Some(fx.course));
    }

    #[test]
    fn test_half_answered_is_in_progress() {
        let fx = fixture();
        let (assignment, questions) = fx.assignment(20, &[5, 5, 5, 5]);
        fx.answer(assignment, questions[0], None);
        fx.answer(assignment, questions[1], None);

        let progress = ProgressCalculator::new()
            .compute_assignment_progress(&fx.repo, assignment, fx.student)
            .unwrap();
        assert_eq!(progress.progress_percentage, 50.0);
        assert_eq!(progress.status, ProgressStatus::InProgress);
    }

    #[test]
    fn test_recompute_is_idempotent() {
        let fx = fixture();
        let (assignment, questions) = fx.assignment(10, &[5, 5, 5]);
        fx.answer(assignment, questions[0], None);

        let calc = ProgressCalculator::new();
        let first = calc
            .compute_assignment_progress(&fx.repo, assignment, fx.student)
            .unwrap();
        let second = calc
            .compute_assignment_progress(&fx.repo, assignment, fx.student)
            .unwrap();
        assert_eq!(first.progress_percentage, second.progress_percentage);
        assert_eq!(first.status, second.status);
        assert_eq!(fx.repo.list_progress_by_student(fx.student).unwrap().len(), 1);
    }

    #[test]
    fn test_missing_assignment_is_not_found() {
        let fx = fixture();
        let err = ProgressCalculator::new()
            .compute_assignment_progress(&fx.repo, 9_999, fx.student)
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_zero_answers_uses_configured_status() {
        let fx = fixture();
        let (assignment, _) = fx.assignment(10, &[5, 5]);

        let default = ProgressCalculator::new()
            .compute_assignment_progress(&fx.repo, assignment, fx.student)
            .unwrap();
        assert_eq!(default.status, ProgressStatus::NotStarted);

        let legacy = ProgressCalculator::new()
            .with_zero_progress_status(ProgressStatus::InProgress)
            .compute_assignment_progress(&fx.repo, assignment, fx.student)
            .unwrap();
        assert_eq!(legacy.status, ProgressStatus::InProgress);
    }

    #[test]
    fn test_fault_propagates_without_retry() {
        let fx = fixture();
        let (assignment, _) = fx.assignment(10, &[5]);
        fx.repo.inject_faults(InjectedFault::Busy, 1);

        let err = ProgressCalculator::new()
            .compute_assignment_progress(&fx.repo, assignment, fx.student)
            .unwrap_err();
        assert!(err.is_transient());
    }
}
