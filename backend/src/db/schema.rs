use sqlx::AnyPool;

/// Startup migration. Index creation happens here, not lazily on first use.
pub async fn migrate(pool: &AnyPool) -> anyhow::Result<()> {
    for ddl in TABLES {
        sqlx::query(ddl).execute(pool).await?;
    }
    for ddl in INDEXES {
        sqlx::query(ddl).execute(pool).await?;
    }
    Ok(())
}

const TABLES: &[&str] = &[
    // Users: wallet projection + push token.
    r#"
CREATE TABLE IF NOT EXISTS users (
  user_id TEXT PRIMARY KEY,
  role TEXT NOT NULL,
  wallet_balance BIGINT NOT NULL DEFAULT 0,
  fcm_token TEXT,
  created_ms BIGINT NOT NULL
);
"#,
    r#"
CREATE TABLE IF NOT EXISTS captains (
  user_id TEXT PRIMARY KEY,
  is_online INTEGER NOT NULL DEFAULT 0,
  is_verified INTEGER NOT NULL DEFAULT 0,
  is_busy INTEGER NOT NULL DEFAULT 0,
  vehicle_type TEXT,
  is_ev INTEGER NOT NULL DEFAULT 0,

  lat DOUBLE PRECISION,
  lng DOUBLE PRECISION,

  current_job_id TEXT,
  current_job_type TEXT,
  batched_order_ids TEXT NOT NULL DEFAULT '[]',

  average_rating DOUBLE PRECISION NOT NULL DEFAULT 5.0,
  total_ratings BIGINT NOT NULL DEFAULT 0,
  total_trips BIGINT NOT NULL DEFAULT 0,
  cancellations BIGINT NOT NULL DEFAULT 0,

  last_assigned_ms BIGINT,
  last_seen_ms BIGINT,

  go_home_mode INTEGER NOT NULL DEFAULT 0,
  home_lat DOUBLE PRECISION,
  home_lng DOUBLE PRECISION,
  go_home_eta_s BIGINT,
  go_home_distance_m BIGINT,

  created_ms BIGINT NOT NULL
);
"#,
    // One table for both job kinds; job_type tags the variant.
    r#"
CREATE TABLE IF NOT EXISTS jobs (
  job_id TEXT PRIMARY KEY,
  job_type TEXT NOT NULL,
  user_id TEXT NOT NULL,
  restaurant_id TEXT,
  captain_id TEXT,

  pickup_lat DOUBLE PRECISION,
  pickup_lng DOUBLE PRECISION,
  dropoff_lat DOUBLE PRECISION,
  dropoff_lng DOUBLE PRECISION,
  vehicle_type TEXT,

  amount_subtotal BIGINT NOT NULL,
  surge_multiplier DOUBLE PRECISION NOT NULL DEFAULT 1.0,
  surge_amount BIGINT NOT NULL DEFAULT 0,
  amount_total BIGINT NOT NULL,
  wallet_amount BIGINT NOT NULL DEFAULT 0,
  reward_redeem_amount BIGINT NOT NULL DEFAULT 0,
  payment_amount BIGINT NOT NULL,
  payment_mode TEXT NOT NULL,
  gateway_payment_id TEXT,
  is_paid INTEGER NOT NULL DEFAULT 0,
  settled INTEGER NOT NULL DEFAULT 0,
  settled_ms BIGINT,

  status TEXT NOT NULL,
  job_status TEXT NOT NULL,
  offer_captain_id TEXT,
  offer_expires_ms BIGINT,
  job_attempts BIGINT NOT NULL DEFAULT 0,
  rejected_captains TEXT NOT NULL DEFAULT '[]',
  matching_retry_count BIGINT NOT NULL DEFAULT 0,
  assign_by_ms BIGINT,
  complete_by_ms BIGINT,
  status_history TEXT NOT NULL DEFAULT '[]',
  batched INTEGER NOT NULL DEFAULT 0,

  cancelled_by TEXT,
  cancel_reason TEXT,

  created_ms BIGINT NOT NULL,
  status_updated_ms BIGINT NOT NULL,
  matched_ms BIGINT
);
"#,
    // Restaurants: only what pickup resolution needs.
    r#"
CREATE TABLE IF NOT EXISTS restaurants (
  restaurant_id TEXT PRIMARY KEY,
  owner_id TEXT,
  lat DOUBLE PRECISION,
  lng DOUBLE PRECISION,
  created_ms BIGINT NOT NULL
);
"#,
    r#"
CREATE TABLE IF NOT EXISTS wallet_transactions (
  txn_id TEXT PRIMARY KEY,
  user_id TEXT NOT NULL,
  amount BIGINT NOT NULL,
  kind TEXT NOT NULL,
  reason TEXT NOT NULL,
  source TEXT NOT NULL,
  reference TEXT,
  is_refund INTEGER NOT NULL DEFAULT 0,
  balance_after BIGINT NOT NULL,
  created_ms BIGINT NOT NULL
);
"#,
    r#"
CREATE TABLE IF NOT EXISTS ledger_transactions (
  tx_id TEXT PRIMARY KEY,
  reference_type TEXT NOT NULL,
  reference_id TEXT,
  amount BIGINT NOT NULL,
  created_ms BIGINT NOT NULL
);
"#,
    r#"
CREATE TABLE IF NOT EXISTS ledger_entries (
  entry_id TEXT PRIMARY KEY,
  tx_id TEXT NOT NULL,
  user_id TEXT,
  account TEXT NOT NULL,
  direction TEXT NOT NULL,
  amount BIGINT NOT NULL,
  reference_type TEXT NOT NULL,
  reference_id TEXT,
  created_ms BIGINT NOT NULL
);
"#,
    r#"
CREATE TABLE IF NOT EXISTS cancellations (
  cancellation_id TEXT PRIMARY KEY,
  job_type TEXT NOT NULL,
  job_id TEXT NOT NULL,
  actor_id TEXT,
  actor_role TEXT NOT NULL,
  reason TEXT NOT NULL,
  late_delivery INTEGER NOT NULL DEFAULT 0,
  no_show INTEGER NOT NULL DEFAULT 0,
  refund_amount BIGINT NOT NULL DEFAULT 0,
  penalty_amount BIGINT NOT NULL DEFAULT 0,
  metadata TEXT NOT NULL DEFAULT '{}',
  created_ms BIGINT NOT NULL
);
"#,
    r#"
CREATE TABLE IF NOT EXISTS refunds (
  refund_id TEXT PRIMARY KEY,
  user_id TEXT NOT NULL,
  amount BIGINT NOT NULL,
  source TEXT NOT NULL,
  reference TEXT NOT NULL,
  method TEXT NOT NULL,
  created_ms BIGINT NOT NULL
);
"#,
    r#"
CREATE TABLE IF NOT EXISTS penalties (
  penalty_id TEXT PRIMARY KEY,
  actor_id TEXT NOT NULL,
  amount BIGINT NOT NULL,
  reason TEXT NOT NULL,
  reference TEXT NOT NULL,
  created_ms BIGINT NOT NULL
);
"#,
    r#"
CREATE TABLE IF NOT EXISTS notifications (
  notification_id TEXT PRIMARY KEY,
  user_id TEXT NOT NULL,
  title TEXT NOT NULL,
  body TEXT NOT NULL,
  data TEXT NOT NULL DEFAULT '{}',
  priority TEXT NOT NULL,
  status TEXT NOT NULL,
  retry_count BIGINT NOT NULL DEFAULT 0,
  send_at_ms BIGINT,
  created_ms BIGINT NOT NULL
);
"#,
    r#"
CREATE TABLE IF NOT EXISTS notification_logs (
  log_id TEXT PRIMARY KEY,
  notification_id TEXT NOT NULL,
  status TEXT NOT NULL,
  detail TEXT,
  created_ms BIGINT NOT NULL
);
"#,
    // One row per ranking decision and one per issued offer.
    r#"
CREATE TABLE IF NOT EXISTS matching_logs (
  log_id TEXT PRIMARY KEY,
  job_type TEXT NOT NULL,
  job_id TEXT NOT NULL,
  candidate_ids TEXT,
  eta_map TEXT,
  offered_captain_id TEXT,
  expires_ms BIGINT,
  created_ms BIGINT NOT NULL
);
"#,
    r#"
CREATE TABLE IF NOT EXISTS surge_history (
  surge_id TEXT PRIMARY KEY,
  job_type TEXT NOT NULL,
  lat DOUBLE PRECISION NOT NULL,
  lng DOUBLE PRECISION NOT NULL,
  demand BIGINT NOT NULL,
  supply BIGINT NOT NULL,
  ratio DOUBLE PRECISION NOT NULL,
  time_factor DOUBLE PRECISION NOT NULL,
  weather_factor DOUBLE PRECISION NOT NULL,
  surge_multiplier DOUBLE PRECISION NOT NULL,
  created_ms BIGINT NOT NULL
);
"#,
    r#"
CREATE TABLE IF NOT EXISTS trust_logs (
  log_id TEXT PRIMARY KEY,
  user_id TEXT NOT NULL,
  finding TEXT NOT NULL,
  detail TEXT,
  created_ms BIGINT NOT NULL
);
"#,
];

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_jobs_type_status ON jobs(job_type, job_status);",
    "CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);",
    "CREATE INDEX IF NOT EXISTS idx_captains_availability ON captains(is_online, is_busy);",
    "CREATE INDEX IF NOT EXISTS idx_wallet_txns_user ON wallet_transactions(user_id, created_ms);",
    "CREATE INDEX IF NOT EXISTS idx_ledger_entries_tx ON ledger_entries(tx_id);",
    "CREATE INDEX IF NOT EXISTS idx_ledger_entries_user ON ledger_entries(user_id, created_ms);",
    "CREATE INDEX IF NOT EXISTS idx_ledger_tx_reference ON ledger_transactions(reference_type, reference_id);",
    "CREATE INDEX IF NOT EXISTS idx_notifications_status ON notifications(status, send_at_ms);",
    "CREATE INDEX IF NOT EXISTS idx_cancellations_job ON cancellations(job_type, job_id);",
    "CREATE INDEX IF NOT EXISTS idx_matching_logs_job ON matching_logs(job_id, created_ms);",
    "CREATE INDEX IF NOT EXISTS idx_surge_history_created ON surge_history(created_ms);",
];
