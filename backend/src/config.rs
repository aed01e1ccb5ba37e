use crate::jobs::model::VehicleType;

#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Database connection string.
    pub database_url: String,

    /// HTTP bind address, `host:port`.
    pub bind_addr: String,

    /// HS256 secret for bearer-token verification.
    pub jwt_secret: String,

    /// Map-provider API key. Absent => ETA re-ranking and go-home ETA
    /// refresh are disabled and dispatch uses the scored order.
    pub maps_api_key: Option<String>,

    /// Deadline for a single outbound map-provider call, seconds.
    pub maps_timeout_sec: u64,

    // =========================
    // Matching configuration
    // =========================
    /// Geo query radius around the pickup when discovering candidates (m).
    pub match_radius_m: u32,

    /// Upper bound on the candidate queue written per job.
    ///
    /// Bounds the worst-case offer chain: a job that exhausts the queue
    /// falls into the no-captain retry policy instead of scanning forever.
    pub match_max_candidates: usize,

    /// How long a captain holds an exclusive offer before it times out (s).
    pub offer_timeout_sec: u64,

    /// Orders a single captain may carry at once (batching cap).
    pub max_batch_orders: usize,

    /// Radius for piggybacking an order onto a busy captain (m).
    /// Clamped to at most 2 km regardless of the match radius.
    pub batch_radius_m: u32,

    /// Scoring weights. Lower score wins; distance is the dominant term
    /// and is inflated by the surge multiplier so that in hot zones the
    /// ranker prefers strictly closer captains.
    pub w_distance: f64,
    pub w_rating: f64,
    pub w_fairness: f64,

    /// External weather severity input, 1.0 = neutral. Values above 1.0
    /// add `weather_factor - 1.0` to the surge multiplier.
    pub weather_factor: f64,

    /// Vehicle types allowed to carry food orders.
    pub food_allowed_vehicles: Vec<VehicleType>,

    // =========================
    // SLA configuration
    // =========================
    /// A PLACED order must be assigned within this window (s).
    pub order_assign_timeout_sec: u64,
    /// An ASSIGNED order must be delivered within this window (min).
    pub order_delivery_sla_min: u64,
    /// A REQUESTED ride must be assigned within this window (s).
    pub ride_assign_timeout_sec: u64,
    /// An ASSIGNED ride must complete within this window (min).
    pub ride_complete_sla_min: u64,

    /// Re-discovery attempts after the candidate queue drains.
    pub match_retry_max: u32,
    /// Base delay between re-discovery attempts; attempt n waits
    /// `match_retry_delay_sec * (n + 1)`.
    pub match_retry_delay_sec: u64,

    // =========================
    // Money configuration
    // =========================
    /// Platform commission taken at settlement, fraction of the total.
    pub commission_pct: f64,

    // =========================
    // HTTP surface configuration
    // =========================
    pub rate_limit_enabled: bool,
    pub rate_limit_max_requests: u32,
    pub rate_limit_window_sec: u64,
    pub rate_limit_exempt_paths: Vec<String>,

    /// How long a stored idempotent response can be replayed (s).
    pub idempotency_ttl_sec: u64,

    /// Delivery attempts per notification before it is marked FAILED.
    pub notification_max_retries: u32,

    /// Location updates implying a speed above this are rejected as GPS
    /// jumps and recorded as trust findings (km/h).
    pub max_plausible_speed_kmph: f64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            database_url: env_str("DATABASE_URL", "sqlite://dispatch_dev.db"),
            bind_addr: env_str("BIND_ADDR", "0.0.0.0:8000"),
            jwt_secret: env_str("JWT_SECRET", "insecure-dev-secret"),
            maps_api_key: std::env::var("MAPS_API_KEY").ok().filter(|v| !v.is_empty()),
            maps_timeout_sec: env_u64("MAPS_TIMEOUT_SEC", 10),

            match_radius_m: env_u64("MATCH_RADIUS_M", 5_000) as u32,
            match_max_candidates: env_u64("MAX_CANDIDATES", 20) as usize,
            offer_timeout_sec: env_u64("OFFER_TIMEOUT_SEC", 15),
            max_batch_orders: env_u64("MAX_BATCH_ORDERS", 3) as usize,
            batch_radius_m: env_u64("BATCH_RADIUS_M", 2_000) as u32,

            w_distance: env_f64("W_DISTANCE", 1.0),
            w_rating: env_f64("W_RATING", 0.4),
            w_fairness: env_f64("W_FAIRNESS", 0.2),

            weather_factor: env_f64("WEATHER_FACTOR", 1.0),

            food_allowed_vehicles: parse_vehicles(&env_str(
                "FOOD_ALLOWED_VEHICLES",
                "BIKE_PETROL,BIKE_EV",
            )),

            order_assign_timeout_sec: env_u64("ORDER_ASSIGN_TIMEOUT_SEC", 600),
            order_delivery_sla_min: env_u64("ORDER_DELIVERY_SLA_MIN", 45),
            ride_assign_timeout_sec: env_u64("RIDE_ASSIGN_TIMEOUT_SEC", 300),
            ride_complete_sla_min: env_u64("RIDE_COMPLETE_SLA_MIN", 60),

            match_retry_max: env_u64("MATCH_RETRY_MAX", 2) as u32,
            match_retry_delay_sec: env_u64("MATCH_RETRY_DELAY_SEC", 20),

            commission_pct: env_f64("COMMISSION_PCT", 0.2),

            rate_limit_enabled: env_bool("RATE_LIMIT_ENABLED", true),
            rate_limit_max_requests: env_u64("RATE_LIMIT_MAX_REQUESTS", 300) as u32,
            rate_limit_window_sec: env_u64("RATE_LIMIT_WINDOW_SEC", 60),
            rate_limit_exempt_paths: vec!["/healthz".to_string()],

            idempotency_ttl_sec: env_u64("IDEMPOTENCY_TTL_SEC", 86_400),

            notification_max_retries: env_u64("NOTIFICATION_MAX_RETRIES", 3) as u32,

            max_plausible_speed_kmph: env_f64("MAX_PLAUSIBLE_SPEED_KMPH", 150.0),
        }
    }

    /// Assign-by window for a job type, seconds.
    pub fn assign_timeout_sec(&self, job_type: crate::jobs::model::JobType) -> u64 {
        match job_type {
            crate::jobs::model::JobType::Order => self.order_assign_timeout_sec,
            crate::jobs::model::JobType::Ride => self.ride_assign_timeout_sec,
        }
    }

    /// Deliver/complete-by window for a job type, seconds.
    pub fn completion_sla_sec(&self, job_type: crate::jobs::model::JobType) -> u64 {
        match job_type {
            crate::jobs::model::JobType::Order => self.order_delivery_sla_min * 60,
            crate::jobs::model::JobType::Ride => self.ride_complete_sla_min * 60,
        }
    }
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => v == "1" || v.eq_ignore_ascii_case("true"),
        Err(_) => default,
    }
}

fn parse_vehicles(raw: &str) -> Vec<VehicleType> {
    raw.split(',')
        .filter_map(|v| VehicleType::normalize(v))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::model::JobType;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = AppConfig::from_env();
        assert_eq!(cfg.match_radius_m, 5_000);
        assert_eq!(cfg.match_max_candidates, 20);
        assert_eq!(cfg.offer_timeout_sec, 15);
        assert_eq!(cfg.max_batch_orders, 3);
        assert_eq!(cfg.match_retry_max, 2);
        assert_eq!(cfg.match_retry_delay_sec, 20);
        assert!((cfg.commission_pct - 0.2).abs() < 1e-9);
        assert_eq!(cfg.idempotency_ttl_sec, 86_400);
    }

    #[test]
    fn sla_windows_are_per_job_type() {
        let cfg = AppConfig::from_env();
        assert_eq!(cfg.assign_timeout_sec(JobType::Order), 600);
        assert_eq!(cfg.assign_timeout_sec(JobType::Ride), 300);
        assert_eq!(cfg.completion_sla_sec(JobType::Order), 45 * 60);
        assert_eq!(cfg.completion_sla_sec(JobType::Ride), 60 * 60);
    }

    #[test]
    fn vehicle_list_parses_and_skips_unknown() {
        let parsed = parse_vehicles("BIKE_PETROL, bike_ev ,SPACESHIP");
        assert_eq!(
            parsed,
            vec![VehicleType::BikePetrol, VehicleType::BikeEv]
        );
    }
}
