// ==========================================
// 作答 → 进度 → 总评 端到端测试（SQLite）
// ==========================================


use school_backend::api::{AssignmentPatch, ErrorOutcome, FeePaymentRequest};
use school_backend::domain::{AnswerSubmission, ProgressStatus};
use school_backend::repository::GradebookRepository;
use test_helpers::{create_assignment, create_test_state, seed_school};

fn all_answers(questions: &[i64], choice: &str) -> Vec<AnswerSubmission> {
    questions
        .iter()
        .map(|q| AnswerSubmission {
            question_id: *q,
            chosen_answer: choice.to_string(),
        })
        .collect()
}

#[test]
fn test_full_marks_scenario() {
    let (_tmp, state) = create_test_state();
    let school = seed_school(&state);
    let (assignment, questions) = create_assignment(&state, &school, 10, &[5, 5]);

    let result = state
        .student_api
        .submit_all_answers(&school.student, assignment, &all_answers(&questions, "A"))
        .unwrap();
    assert_eq!(result.progress.progress_percentage, 100.0);
    assert_eq!(result.progress.status, ProgressStatus::Completed);
    assert_eq!(result.overall_grade.grade, 0.0);

    for answer in &result.answers {
        state
            .teacher_api
            .score_answer(&school.teacher, answer.id, 5, Some("正确"))
            .unwrap();
    }

    let grade = state
        .student_api
        .overall_grade(&school.student, Some(school.course))
        .unwrap();
    assert_eq!(grade.grade, 100.0);
    assert_eq!(grade.letter_grade, None);
}

#[test]
fn test_unsubmitted_assignment_counts_toward_max() {
    let (_tmp, state) = create_test_state();
    let school = seed_school(&state);
    let (done, questions) = create_assignment(&state, &school, 10, &[10]);
    let (_skipped, _) = create_assignment(&state, &school, 10, &[10]);

    let result = state
        .student_api
        .submit_answer(&school.student, done, questions[0], "A")
        .unwrap();
    state
        .teacher_api
        .score_answer(&school.teacher, result.answers[0].id, 10, None)
        .unwrap();

    let grade = state
        .repo
        .find_grade(school.student.user_id, school.course, None)
        .unwrap()
        .unwrap();
    assert_eq!(grade.grade, 50.0);
}

#[test]
fn test_editing_unanswered_assignment_refreshes_course_grade() {
    let (_tmp, state) = create_test_state();
    let school = seed_school(&state);
    let (done, questions) = create_assignment(&state, &school, 10, &[10]);
    let (skipped, _) = create_assignment(&state, &school, 10, &[10]);

    let result = state
        .student_api
        .submit_answer(&school.student, done, questions[0], "A")
        .unwrap();
    state
        .teacher_api
        .score_answer(&school.teacher, result.answers[0].id, 10, None)
        .unwrap();
    let stored_grade = || {
        state
            .repo
            .find_grade(school.student.user_id, school.course, None)
            .unwrap()
            .unwrap()
            .grade
    };
    assert_eq!(stored_grade(), 50.0);

    state
        .teacher_api
        .update_assignment(
            &school.teacher,
            skipped,
            &AssignmentPatch {
                max_points: Some(30),
                ..AssignmentPatch::default()
            },
        )
        .unwrap();
    assert_eq!(stored_grade(), 25.0);

    state
        .teacher_api
        .delete_assignment(&school.teacher, skipped)
        .unwrap();
    assert_eq!(stored_grade(), 100.0);

    create_assignment(&state, &school, 10, &[10]);
    assert_eq!(stored_grade(), 50.0);
}

#[test]
fn test_half_answered_progress() {
    let (_tmp, state) = create_test_state();
    let school = seed_school(&state);
    let (assignment, questions) = create_assignment(&state, &school, 20, &[5, 5, 5, 5]);

    let result = state
        .student_api
        .submit_all_answers(
            &school.student,
            assignment,
            &all_answers(&questions[..2], "B"),
        )
        .unwrap();
    assert_eq!(result.progress.progress_percentage, 50.0);
    assert_eq!(result.progress.status, ProgressStatus::InProgress);

    let progress = state.student_api.view_progress(&school.student).unwrap();
    assert_eq!(progress.len(), 1);
    assert_eq!(progress[0].assignment_id, Some(assignment));
    assert_eq!(progress[0].course_id, Some(school.course));
}

#[test]
fn test_resubmission_keeps_score_and_feedback() {
    let (_tmp, state) = create_test_state();
    let school = seed_school(&state);
    let (assignment, questions) = create_assignment(&state, &school, 5, &[5]);

    let first = state
        .student_api
        .submit_answer(&school.student, assignment, questions[0], "B")
        .unwrap();
    state
        .teacher_api
        .score_answer(&school.teacher, first.answers[0].id, 3, Some("部分正确"))
        .unwrap();

    let second = state
        .student_api
        .submit_answer(&school.student, assignment, questions[0], "A")
        .unwrap();
    assert_eq!(second.answers[0].id, first.answers[0].id);
    assert_eq!(second.answers[0].chosen_answer, "A");
    assert_eq!(second.answers[0].score, Some(3));
    assert_eq!(second.answers[0].feedback.as_deref(), Some("部分正确"));
    assert_eq!(second.overall_grade.grade, 60.0);

    let feedback = state
        .student_api
        .assignment_feedback(&school.student, assignment)
        .unwrap();
    assert_eq!(feedback.len(), 1);
    assert_eq!(feedback[0].question, "第 1 题");
    assert_eq!(feedback[0].score, Some(3));
}

#[test]
fn test_unenrolled_student_cannot_submit() {
    let (_tmp, state) = create_test_state();
    let school = seed_school(&state);
    let (assignment, questions) = create_assignment(&state, &school, 5, &[5]);

    let err = state
        .student_api
        .submit_answer(&school.other_student, assignment, questions[0], "A")
        .unwrap_err();
    assert_eq!(err.outcome(), ErrorOutcome::Forbidden);
}

#[test]
fn test_unpublished_assignment_is_hidden() {
    let (_tmp, state) = create_test_state();
    let school = seed_school(&state);
    let (assignment, questions) = create_assignment(&state, &school, 5, &[5]);
    state
        .teacher_api
        .update_assignment(
            &school.teacher,
            assignment,
            &school_backend::api::AssignmentPatch {
                published: Some(false),
                ..Default::default()
            },
        )
        .unwrap();

    assert!(state
        .student_api
        .list_course_assignments(&school.student, school.course)
        .unwrap()
        .is_empty());
    let err = state
        .student_api
        .submit_answer(&school.student, assignment, questions[0], "A")
        .unwrap_err();
    assert_eq!(err.outcome(), ErrorOutcome::NotFound);
}

#[test]
fn test_show_assignment_hides_correct_answer() {
    let (_tmp, state) = create_test_state();
    let school = seed_school(&state);
    let (assignment, _) = create_assignment(&state, &school, 4, &[1, 3]);

    let detail = state
        .student_api
        .show_assignment(&school.student, assignment)
        .unwrap();
    assert_eq!(detail.questions.len(), 2);
    let json = serde_json::to_string(&detail).unwrap();
    assert!(!json.contains("correct_answer"));
}

#[test]
fn test_pay_course_fee_rules() {
    let (_tmp, state) = create_test_state();
    let school = seed_school(&state);
    let request = FeePaymentRequest {
        amount: 300.0,
        payment_method: Some("card".to_string()),
        transaction_id: Some("TX-001".to_string()),
        remarks: None,
    };

    let err = state
        .student_api
        .pay_course_fee(&school.other_student, school.course, &request)
        .unwrap_err();
    assert_eq!(err.outcome(), ErrorOutcome::Forbidden);

    let payment = state
        .student_api
        .pay_course_fee(&school.student, school.course, &request)
        .unwrap();
    assert_eq!(payment.transaction_id.as_deref(), Some("TX-001"));

    // 交易号唯一
    let err = state
        .student_api
        .pay_course_fee(&school.student, school.course, &request)
        .unwrap_err();
    assert_eq!(err.outcome(), ErrorOutcome::Conflict);

    let err = state
        .student_api
        .pay_course_fee(
            &school.student,
            school.course,
            &FeePaymentRequest {
                amount: 0.001,
                transaction_id: None,
                ..request
            },
        )
        .unwrap_err();
    assert_eq!(err.outcome(), ErrorOutcome::Validation);
}

#[test]
fn test_recalculate_and_export_assignment_grades() {
    let (_tmp, state) = create_test_state();
    let school = seed_school(&state);
    let (assignment, questions) = create_assignment(&state, &school, 3, &[1, 2]);

    let result = state
        .student_api
        .submit_all_answers(&school.student, assignment, &all_answers(&questions, "A"))
        .unwrap();
    state
        .teacher_api
        .score_answer(&school.teacher, result.answers[0].id, 1, None)
        .unwrap();

    let count = state
        .teacher_api
        .recalculate_grades(&school.teacher, assignment)
        .unwrap();
    assert_eq!(count, 1);

    let rows = state
        .teacher_api
        .export_grades(&school.teacher, assignment)
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].student_name, "student");
    assert_eq!(rows[0].grade, 33.33);

    // 课程总评与作业级成绩分开存放
    let course_grade = state
        .student_api
        .overall_grade(&school.student, Some(school.course))
        .unwrap();
    assert!(course_grade.assignment_id.is_none());
}
