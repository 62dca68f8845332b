//! Embedded SQLite schema.

/// Schema and pragmas, applied idempotently at open.
pub const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;
PRAGMA temp_store = MEMORY;

CREATE TABLE IF NOT EXISTS parameter_sets (
    parameter_set_id TEXT PRIMARY KEY,
    s0_points INTEGER NOT NULL,
    delta_points INTEGER NOT NULL,
    pair_cap_points INTEGER NOT NULL,
    trigger_rule TEXT NOT NULL,
    reference_price_source TEXT NOT NULL,
    tie_break_rule TEXT NOT NULL,
    sampling_mode TEXT NOT NULL,
    cycle_interval_seconds INTEGER,
    cycles_per_market INTEGER,
    feed_gap_threshold_seconds INTEGER NOT NULL,
    stop_loss_threshold_points INTEGER,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS markets (
    market_id TEXT PRIMARY KEY,
    crypto_asset TEXT NOT NULL,
    condition_id TEXT NOT NULL,
    yes_token_id TEXT NOT NULL,
    no_token_id TEXT NOT NULL,
    tick_size_points INTEGER NOT NULL,
    start_time TEXT NOT NULL,
    settlement_time TEXT NOT NULL,
    actual_settlement_time TEXT,
    parameter_set_id TEXT NOT NULL REFERENCES parameter_sets(parameter_set_id),
    time_remaining_at_start INTEGER,
    cycle_interval_seconds INTEGER,
    total_attempts INTEGER NOT NULL DEFAULT 0,
    total_pairs INTEGER NOT NULL DEFAULT 0,
    total_failed INTEGER NOT NULL DEFAULT 0,
    settlement_failures INTEGER NOT NULL DEFAULT 0,
    pair_rate REAL,
    avg_time_to_pair REAL,
    median_time_to_pair REAL,
    max_concurrent_attempts INTEGER,
    total_cycles_run INTEGER,
    anomaly_count INTEGER
);

CREATE TABLE IF NOT EXISTS attempts (
    attempt_id INTEGER PRIMARY KEY,
    market_id TEXT NOT NULL REFERENCES markets(market_id),
    parameter_set_id TEXT NOT NULL REFERENCES parameter_sets(parameter_set_id),
    t1_timestamp TEXT NOT NULL,
    first_leg_side TEXT NOT NULL,
    p1_points INTEGER NOT NULL,
    reference_yes_points INTEGER NOT NULL,
    reference_no_points INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'active',
    t2_timestamp TEXT,
    time_to_pair_seconds INTEGER,
    time_remaining_at_start INTEGER NOT NULL,
    time_remaining_at_completion INTEGER,
    actual_opposite_price INTEGER,
    pair_cost_points INTEGER,
    pair_profit_points INTEGER,
    fail_reason TEXT,
    had_feed_gap INTEGER NOT NULL DEFAULT 0,
    closest_approach_points INTEGER,
    max_adverse_excursion_points INTEGER,
    yes_spread_entry_points INTEGER,
    no_spread_entry_points INTEGER,
    yes_spread_exit_points INTEGER,
    no_spread_exit_points INTEGER,
    delta_points INTEGER NOT NULL,
    s0_points INTEGER NOT NULL,
    stop_loss_threshold_points INTEGER,
    annotations TEXT
);

CREATE INDEX IF NOT EXISTS idx_attempts_t1 ON attempts(t1_timestamp);
CREATE INDEX IF NOT EXISTS idx_attempts_delta ON attempts(delta_points);
CREATE INDEX IF NOT EXISTS idx_attempts_s0 ON attempts(s0_points);
CREATE INDEX IF NOT EXISTS idx_attempts_params
    ON attempts(s0_points, delta_points, stop_loss_threshold_points, status, t1_timestamp);
CREATE INDEX IF NOT EXISTS idx_attempts_market ON attempts(market_id);
CREATE INDEX IF NOT EXISTS idx_attempts_status ON attempts(status);

CREATE TABLE IF NOT EXISTS snapshots (
    snapshot_id INTEGER PRIMARY KEY AUTOINCREMENT,
    market_id TEXT NOT NULL,
    cycle_number INTEGER NOT NULL,
    captured_at TEXT NOT NULL,
    yes_bid_points INTEGER,
    yes_ask_points INTEGER,
    no_bid_points INTEGER,
    no_ask_points INTEGER,
    yes_last_trade_points INTEGER,
    no_last_trade_points INTEGER
);
CREATE INDEX IF NOT EXISTS idx_snapshots_market_cycle ON snapshots(market_id, cycle_number);

CREATE TABLE IF NOT EXISTS attempt_lifecycle (
    lifecycle_id INTEGER PRIMARY KEY AUTOINCREMENT,
    attempt_id INTEGER NOT NULL,
    market_id TEXT NOT NULL,
    cycle_number INTEGER NOT NULL,
    recorded_at TEXT NOT NULL,
    event TEXT NOT NULL,
    detail TEXT
);
CREATE INDEX IF NOT EXISTS idx_lifecycle_attempt ON attempt_lifecycle(attempt_id);
"#;
