// ==========================================
// ConfigManager 集成测试
// ==========================================
// 测试目标: 配置读取、非法值回退、配置对计算的影响
// ==========================================


use school_backend::app::AppState;
use school_backend::config::{config_keys, ConfigManager, GradingConfig};
use school_backend::domain::ProgressStatus;
use school_backend::engine::ProgressCalculator;
use test_helpers::{create_assignment, create_test_db, insert_config, seed_school};

#[test]
fn test_defaults_without_rows() {
    let (_temp_file, db_path) = create_test_db().expect("Failed to create test db");
    let manager = ConfigManager::new(&db_path).expect("Failed to create ConfigManager");

    let config = manager.load_grading_config().unwrap();
    assert_eq!(config, GradingConfig::default());
    assert_eq!(config.zero_progress_status, ProgressStatus::NotStarted);
    assert_eq!(config.recompute_max_retries, 1);
    assert_eq!(config.analytics_round_decimals, 2);
}

#[test]
fn test_values_read_from_config_kv() {
    let (_temp_file, db_path) = create_test_db().expect("Failed to create test db");
    insert_config(&db_path, config_keys::ZERO_PROGRESS_STATUS, "in_progress").unwrap();
    insert_config(&db_path, config_keys::RECOMPUTE_MAX_RETRIES, "3").unwrap();
    insert_config(&db_path, config_keys::ANALYTICS_ROUND_DECIMALS, "1").unwrap();

    let manager = ConfigManager::new(&db_path).unwrap();
    let config = manager.load_grading_config().unwrap();
    assert_eq!(config.zero_progress_status, ProgressStatus::InProgress);
    assert_eq!(config.recompute_max_retries, 3);
    assert_eq!(config.analytics_round_decimals, 1);

    let snapshot: serde_json::Value =
        serde_json::from_str(&manager.get_config_snapshot().unwrap()).unwrap();
    assert_eq!(snapshot[config_keys::RECOMPUTE_MAX_RETRIES], "3");
}

#[test]
fn test_invalid_values_fall_back() {
    let (_temp_file, db_path) = create_test_db().expect("Failed to create test db");
    insert_config(&db_path, config_keys::ZERO_PROGRESS_STATUS, "SOMETIMES").unwrap();
    insert_config(&db_path, config_keys::RECOMPUTE_MAX_RETRIES, "-1").unwrap();
    insert_config(&db_path, config_keys::ANALYTICS_ROUND_DECIMALS, "99").unwrap();

    let config = ConfigManager::new(&db_path)
        .unwrap()
        .load_grading_config()
        .unwrap();
    assert_eq!(config, GradingConfig::default());
}

#[test]
fn test_zero_progress_status_flows_into_calculation() {
    let (_temp_file, db_path) = create_test_db().expect("Failed to create test db");
    insert_config(&db_path, config_keys::ZERO_PROGRESS_STATUS, "IN_PROGRESS").unwrap();
    insert_config(&db_path, config_keys::ANALYTICS_ROUND_DECIMALS, "1").unwrap();

    let state = AppState::new(db_path).unwrap();
    assert_eq!(state.config.zero_progress_status, ProgressStatus::InProgress);

    let school = seed_school(&state);
    let (assignment, _) = create_assignment(&state, &school, 3, &[1, 1, 1]);

    let calculator = ProgressCalculator::new()
        .with_zero_progress_status(state.config.zero_progress_status);
    let progress = calculator
        .compute_assignment_progress(&*state.repo, assignment, school.student.user_id)
        .unwrap();
    assert_eq!(progress.progress_percentage, 0.0);
    assert_eq!(progress.status, ProgressStatus::InProgress);

    // 看板按配置的小数位四舍五入
    let detail = state
        .student_api
        .show_assignment(&school.student, assignment)
        .unwrap();
    state
        .student_api
        .submit_answer(&school.student, assignment, detail.questions[0].id, "A")
        .unwrap();
    let dashboard = state.admin_api.dashboard(&school.admin).unwrap();
    assert_eq!(dashboard.overall.average_progress, 33.3);
}

#[test]
fn test_set_global_config_value_overwrites() {
    let (_temp_file, db_path) = create_test_db().expect("Failed to create test db");
    let manager = ConfigManager::new(&db_path).unwrap();
    manager
        .set_global_config_value(config_keys::RECOMPUTE_MAX_RETRIES, "2")
        .unwrap();
    manager
        .set_global_config_value(config_keys::RECOMPUTE_MAX_RETRIES, "4")
        .unwrap();
    assert_eq!(manager.get_recompute_max_retries().unwrap(), 4);
}
