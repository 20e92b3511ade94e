//! Constant-velocity Kalman filter over `(cx, cy, w, h, vx, vy, vw, vh)`
//! (§4.4 "Kalman").
//!
//! Writes the linear-Gaussian predict/update equations (predict, then
//! observation-model update with a Joseph-form-equivalent covariance
//! update) directly against `nalgebra` matrices rather than through a
//! generic Kalman crate (see DESIGN.md).

use nalgebra::{SMatrix, SVector};

pub const STATE_DIM: usize = 8;
pub const MEAS_DIM: usize = 4;

pub type StateVec = SVector<f64, STATE_DIM>;
pub type StateCov = SMatrix<f64, STATE_DIM, STATE_DIM>;
pub type MeasVec = SVector<f64, MEAS_DIM>;

/// One Kalman-filtered track's state. `dt` is fixed at one frame (§4.4:
/// "Δt=1 frame").
#[derive(Debug, Clone, PartialEq)]
pub struct KalmanState {
    pub state: StateVec,
    pub covariance: StateCov,
}

#[derive(Debug, Clone, Copy)]
pub struct KalmanParams {
    pub process_noise: f64,
    pub measurement_noise: f64,
}

impl Default for KalmanParams {
    fn default() -> Self {
        Self {
            process_noise: 1e-2,
            measurement_noise: 1e-1,
        }
    }
}

fn transition_matrix() -> StateCov {
    // F = I + E_vel: identity plus ones coupling position to velocity
    // with dt=1 (§4.4).
    let mut f = StateCov::identity();
    for i in 0..4 {
        f[(i, i + 4)] = 1.0;
    }
    f
}

fn observation_matrix() -> SMatrix<f64, MEAS_DIM, STATE_DIM> {
    // H projects to the first four components (cx, cy, w, h).
    let mut h = SMatrix::<f64, MEAS_DIM, STATE_DIM>::zeros();
    for i in 0..MEAS_DIM {
        h[(i, i)] = 1.0;
    }
    h
}

impl KalmanState {
    /// New track initialized from a single measurement. Initial covariance
    /// `P` is identity (§4.4).
    pub fn new_from_measurement(cx: f64, cy: f64, w: f64, h: f64) -> Self {
        let mut state = StateVec::zeros();
        state[0] = cx;
        state[1] = cy;
        state[2] = w;
        state[3] = h;
        Self {
            state,
            covariance: StateCov::identity(),
        }
    }

    /// Predict one frame forward: `x' = Fx`, `P' = F P F^T + Q`. Process
    /// noise `Q` is a diagonal scalar (§4.4).
    pub fn predict(&self, params: &KalmanParams) -> KalmanState {
        let f = transition_matrix();
        let q = StateCov::identity() * params.process_noise;
        let state = f * self.state;
        let covariance = f * self.covariance * f.transpose() + q;
        KalmanState { state, covariance }
    }

    /// Standard Kalman update given a measurement `(cx, cy, w, h)`.
    /// Measurement noise `R` is a diagonal scalar (§4.4).
    pub fn update(&self, measurement: MeasVec, params: &KalmanParams) -> KalmanState {
        let h = observation_matrix();
        let r = SMatrix::<f64, MEAS_DIM, MEAS_DIM>::identity() * params.measurement_noise;

        let ht = h.transpose();
        let s = h * self.covariance * ht + r;
        let s_inv = match s.try_inverse() {
            Some(inv) => inv,
            None => return self.clone(),
        };
        let k = self.covariance * ht * s_inv;

        let y = measurement - h * self.state;
        let state = self.state + k * y;

        let i_kh = StateCov::identity() - k * h;
        let covariance = i_kh * self.covariance;

        KalmanState { state, covariance }
    }

    pub fn bbox_cxcywh(&self) -> (f32, f32, f32, f32) {
        (
            self.state[0] as f32,
            self.state[1] as f32,
            self.state[2] as f32,
            self.state[3] as f32,
        )
    }

    pub fn velocity(&self) -> (f32, f32) {
        (self.state[4] as f32, self.state[5] as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn stationary_track_has_bounded_velocity_after_many_frames() {
        let params = KalmanParams::default();
        let mut kf = KalmanState::new_from_measurement(100.0, 100.0, 50.0, 80.0);
        for _ in 0..10_000 {
            kf = kf.predict(&params);
            kf = kf.update(MeasVec::new(100.0, 100.0, 50.0, 80.0), &params);
        }
        let (vx, vy) = kf.velocity();
        assert!(vx.abs() < 1.0, "vx={vx} should stay bounded");
        assert!(vy.abs() < 1.0, "vy={vy} should stay bounded");
        assert_relative_eq!(kf.state[0], 100.0, epsilon = 1.0);
    }

    #[test]
    fn predict_then_update_moves_toward_measurement() {
        let params = KalmanParams::default();
        let kf = KalmanState::new_from_measurement(0.0, 0.0, 10.0, 10.0);
        let predicted = kf.predict(&params);
        let updated = predicted.update(MeasVec::new(10.0, 0.0, 10.0, 10.0), &params);
        assert!(updated.state[0] > 0.0 && updated.state[0] <= 10.0);
    }
}
