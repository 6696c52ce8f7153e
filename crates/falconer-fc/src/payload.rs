/// Actuator outputs carrying payload releases, in release order.
pub const PAYLOAD_SERVOS: [u8; 4] = [5, 6, 7, 8];
/// Two release presets per actuator.
pub const PAYLOAD_PWM: [u16; 2] = [1500, 2000];
pub const PWM_REST: u16 = 1000;
pub const PAYLOAD_STAGES: u8 = (PAYLOAD_SERVOS.len() * PAYLOAD_PWM.len()) as u8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadStep {
    /// `stage` is 1-based; the last stage completes the sequence.
    Release { stage: u8, servo: u8, pwm: u16 },
    AlreadyComplete,
}

impl PayloadStep {
    pub fn completes(&self) -> bool {
        matches!(self, PayloadStep::Release { stage, .. } if *stage == PAYLOAD_STAGES)
    }
}

/// Walks the 8-stage release sequence one stage per call. Stays complete until
/// explicitly reset for the next flight.
#[derive(Debug, Default)]
pub struct PayloadSequencer {
    index: u8,
}

impl PayloadSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn is_complete(&self) -> bool {
        self.index >= PAYLOAD_STAGES
    }

    pub fn advance(&mut self) -> PayloadStep {
        if self.is_complete() {
            return PayloadStep::AlreadyComplete;
        }
        let i = self.index as usize;
        let servo = PAYLOAD_SERVOS[i / PAYLOAD_PWM.len()];
        let pwm = PAYLOAD_PWM[i % PAYLOAD_PWM.len()];
        self.index += 1;
        PayloadStep::Release { stage: self.index, servo, pwm }
    }

    pub fn reset(&mut self) {
        self.index = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_order() {
        let mut seq = PayloadSequencer::new();
        let pairs: Vec<(u8, u16)> = (0..8)
            .map(|_| match seq.advance() {
                PayloadStep::Release { servo, pwm, .. } => (servo, pwm),
                PayloadStep::AlreadyComplete => panic!("completed early"),
            })
            .collect();
        assert_eq!(
            pairs,
            vec![(5, 1500), (5, 2000), (6, 1500), (6, 2000), (7, 1500), (7, 2000), (8, 1500), (8, 2000)]
        );
        assert!(seq.is_complete());
    }

    #[test]
    fn test_only_last_stage_completes() {
        let mut seq = PayloadSequencer::new();
        for _ in 0..7 {
            assert!(!seq.advance().completes());
        }
        assert!(seq.advance().completes());
        assert_eq!(seq.advance(), PayloadStep::AlreadyComplete);
        assert_eq!(seq.advance(), PayloadStep::AlreadyComplete);
    }

    #[test]
    fn test_reset_restarts() {
        let mut seq = PayloadSequencer::new();
        for _ in 0..8 {
            seq.advance();
        }
        seq.reset();
        assert_eq!(seq.advance(), PayloadStep::Release { stage: 1, servo: 5, pwm: 1500 });
    }
}
