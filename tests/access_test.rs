// ==========================================
// 访问控制集成测试
// ==========================================
// 测试目标: 角色闸门先于计算，教师只能操作本人作业
// ==========================================


use school_backend::api::{AssignmentPatch, ErrorOutcome, Principal};
use school_backend::domain::{NewAssignment, Role};
use test_helpers::{create_assignment, create_test_state, seed_school, ts};

#[test]
fn test_unknown_user_is_unauthorized() {
    let (_tmp, state) = create_test_state();
    let err = state.authenticate(9_999).unwrap_err();
    assert_eq!(err.outcome(), ErrorOutcome::Unauthorized);
}

#[test]
fn test_authenticate_resolves_role() {
    let (_tmp, state) = create_test_state();
    let school = seed_school(&state);
    let principal = state.authenticate(school.teacher.user_id).unwrap();
    assert_eq!(principal.role, Role::Teacher);
}

#[test]
fn test_role_gate_blocks_other_surfaces() {
    let (_tmp, state) = create_test_state();
    let school = seed_school(&state);

    assert_eq!(
        state.admin_api.dashboard(&school.student).unwrap_err().outcome(),
        ErrorOutcome::Forbidden
    );
    assert_eq!(
        state
            .teacher_api
            .list_assignments(&school.admin)
            .unwrap_err()
            .outcome(),
        ErrorOutcome::Forbidden
    );
    assert_eq!(
        state
            .student_api
            .list_courses(&school.teacher)
            .unwrap_err()
            .outcome(),
        ErrorOutcome::Forbidden
    );
}

#[test]
fn test_teacher_cannot_touch_foreign_assignment() {
    let (_tmp, state) = create_test_state();
    let school = seed_school(&state);
    let (assignment, _) = create_assignment(&state, &school, 5, &[5]);

    let patch = AssignmentPatch {
        title: Some("改名".to_string()),
        ..Default::default()
    };
    let err = state
        .teacher_api
        .update_assignment(&school.other_teacher, assignment, &patch)
        .unwrap_err();
    assert_eq!(err.outcome(), ErrorOutcome::Forbidden);

    let err = state
        .teacher_api
        .delete_assignment(&school.other_teacher, assignment)
        .unwrap_err();
    assert_eq!(err.outcome(), ErrorOutcome::Forbidden);

    let err = state
        .teacher_api
        .export_grades_csv(&school.other_teacher, assignment)
        .unwrap_err();
    assert_eq!(err.outcome(), ErrorOutcome::Forbidden);

    // 不是任课教师也不能在该课程下布置作业
    let err = state
        .teacher_api
        .create_assignment(
            &school.other_teacher,
            &NewAssignment {
                course_id: school.course,
                title: "越权".to_string(),
                description: None,
                instructions: None,
                due_date: ts("2025-03-01 00:00:00"),
                max_points: 10,
                published: true,
            },
        )
        .unwrap_err();
    assert_eq!(err.outcome(), ErrorOutcome::Forbidden);

    let updated = state
        .teacher_api
        .update_assignment(&school.teacher, assignment, &patch)
        .unwrap();
    assert_eq!(updated.title, "改名");
    assert_eq!(updated.max_points, 5);
}

#[test]
fn test_forged_principal_still_checked_by_ownership() {
    let (_tmp, state) = create_test_state();
    let school = seed_school(&state);
    let (assignment, _) = create_assignment(&state, &school, 5, &[5]);

    // 角色正确但 id 不匹配
    let impostor = Principal::new(school.student.user_id, Role::Teacher);
    let err = state
        .teacher_api
        .delete_assignment(&impostor, assignment)
        .unwrap_err();
    assert_eq!(err.outcome(), ErrorOutcome::Forbidden);
}
