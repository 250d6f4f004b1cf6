// src/controller/pid.rs
//
// Per-instance PID state. The integral term accumulates without anti-windup;
// known limitation, kept on purpose.

#[derive(Debug, Clone)]
pub struct PidState {
    setpoint: f64,
    kp: f64,
    ki: f64,
    kd: f64,
    dt_s: f64,
    last_error: f64,
    integral: f64,
}

impl PidState {
    pub fn new(setpoint: f64, kp: f64, ki: f64, kd: f64, dt_s: f64) -> Self {
        Self {
            setpoint,
            kp,
            ki,
            kd,
            dt_s,
            last_error: 0.0,
            integral: 0.0,
        }
    }

    /// One measurement cycle: returns (control output, error).
    pub fn update(&mut self, measured: f64) -> (f64, f64) {
        let error = self.setpoint - measured;
        self.integral += error * self.dt_s;
        let derivative = (error - self.last_error) / self.dt_s;
        let output = self.kp * error + self.ki * self.integral + self.kd * derivative;
        self.last_error = error;
        (output, error)
    }
}
