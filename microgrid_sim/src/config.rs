// runtime configuration (setpoint, gains, timers, adversary knobs)
use anyhow::Result;
use clap::Parser;
use tokio::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub setpoint: f64,
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub warmup_ms: u64,
    pub measure_period_ms: u64,
    pub ack_timeout_ms: u64,
    /// None = retransmit forever (the original behavior).
    pub max_retries: Option<u32>,
    pub mitm_offset: f64,
    pub burst_size: usize,
    pub attack_interval_ms: u64,
    pub oracle_addr: String,
    pub oracle_timeout_ms: u64,
}

impl Config {
    pub fn warmup(&self) -> Duration {
        Duration::from_millis(self.warmup_ms)
    }
    pub fn measure_period(&self) -> Duration {
        Duration::from_millis(self.measure_period_ms)
    }
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }
    pub fn attack_interval(&self) -> Duration {
        Duration::from_millis(self.attack_interval_ms)
    }
    pub fn oracle_timeout(&self) -> Duration {
        Duration::from_millis(self.oracle_timeout_ms)
    }
    /// Fixed inter-sample interval used as the PID Δt, in seconds.
    pub fn dt_secs(&self) -> f64 {
        self.measure_period_ms as f64 / 1000.0
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            setpoint: 0.3,
            kp: 10.0,
            ki: 1.0,
            kd: 2.0,
            warmup_ms: 1000,
            measure_period_ms: 5000,
            ack_timeout_ms: 2000,
            max_retries: None,
            mitm_offset: 2.0,
            burst_size: 10,
            attack_interval_ms: 3000,
            oracle_addr: "127.0.0.1:5556".to_string(),
            oracle_timeout_ms: 500,
        }
    }
}

#[derive(Parser, Debug, Clone)]
pub struct Cli {
    #[arg(long, default_value_t = 0.3)]    pub setpoint: f64,
    #[arg(long, default_value_t = 10.0)]   pub kp: f64,
    #[arg(long, default_value_t = 1.0)]    pub ki: f64,
    #[arg(long, default_value_t = 2.0)]    pub kd: f64,
    #[arg(long, default_value_t = 1000)]   pub warmup_ms: u64,
    #[arg(long, default_value_t = 5000)]   pub measure_period_ms: u64,
    #[arg(long, default_value_t = 2000)]   pub ack_timeout_ms: u64,
    #[arg(long)]                           pub max_retries: Option<u32>,
    #[arg(long, default_value_t = 2.0)]    pub mitm_offset: f64,
    #[arg(long, default_value_t = 10)]     pub burst_size: usize,
    #[arg(long, default_value_t = 3000)]   pub attack_interval_ms: u64,
    #[arg(long, default_value = "127.0.0.1:5556")]
    pub oracle_addr: String,
    #[arg(long, default_value_t = 500)]    pub oracle_timeout_ms: u64,
}

impl Cli {
    pub fn parse_and_build_config() -> Result<Config> {
        let c = <Cli as Parser>::parse();
        Ok(Config {
            setpoint: c.setpoint,
            kp: c.kp,
            ki: c.ki,
            kd: c.kd,
            warmup_ms: c.warmup_ms,
            measure_period_ms: c.measure_period_ms,
            ack_timeout_ms: c.ack_timeout_ms,
            max_retries: c.max_retries,
            mitm_offset: c.mitm_offset,
            burst_size: c.burst_size,
            attack_interval_ms: c.attack_interval_ms,
            oracle_addr: c.oracle_addr,
            oracle_timeout_ms: c.oracle_timeout_ms,
        })
    }
}
