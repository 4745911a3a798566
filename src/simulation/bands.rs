//! Risk band classification

use crate::config::RiskBands;
use crate::types::RiskBand;

use super::SimulationError;

impl RiskBands {
    pub fn new(safe_max_pf: f64, marginal_max_pf: f64) -> Result<Self, SimulationError> {
        let bands = Self { safe_max_pf, marginal_max_pf };
        bands.check()?;
        Ok(bands)
    }

    /// Cut-points must satisfy `0 <= safe_max_pf < marginal_max_pf <= 1`.
    pub fn check(&self) -> Result<(), SimulationError> {
        let ok = self.safe_max_pf.is_finite()
            && self.marginal_max_pf.is_finite()
            && self.safe_max_pf >= 0.0
            && self.safe_max_pf < self.marginal_max_pf
            && self.marginal_max_pf <= 1.0;
        if ok {
            Ok(())
        } else {
            Err(SimulationError::InvalidRiskBands {
                safe_max_pf: self.safe_max_pf,
                marginal_max_pf: self.marginal_max_pf,
            })
        }
    }

    /// Band for a probability of failure. Total and monotone in `pf`.
    pub fn classify(&self, pf: f64) -> RiskBand {
        if pf <= self.safe_max_pf {
            RiskBand::Safe
        } else if pf <= self.marginal_max_pf {
            RiskBand::Marginal
        } else {
            RiskBand::Critical
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_cutpoints() {
        let bands = RiskBands::default();
        assert_eq!(bands.classify(0.0), RiskBand::Safe);
        assert_eq!(bands.classify(0.001), RiskBand::Safe);
        assert_eq!(bands.classify(0.0011), RiskBand::Marginal);
        assert_eq!(bands.classify(0.08), RiskBand::Marginal);
        assert_eq!(bands.classify(0.10), RiskBand::Marginal);
        assert_eq!(bands.classify(0.1001), RiskBand::Critical);
        assert_eq!(bands.classify(1.0), RiskBand::Critical);
    }

    #[test]
    fn test_classification_is_monotone() {
        let bands = RiskBands::default();
        let mut previous = RiskBand::Safe;
        for i in 0..=1000 {
            let band = bands.classify(f64::from(i) / 1000.0);
            assert!(band >= previous);
            previous = band;
        }
    }

    #[test]
    fn test_invalid_cutpoints() {
        assert!(RiskBands::new(0.1, 0.1).is_err());
        assert!(RiskBands::new(0.2, 0.1).is_err());
        assert!(RiskBands::new(-0.1, 0.1).is_err());
        assert!(RiskBands::new(0.0, 1.5).is_err());
        assert!(RiskBands::new(0.0, 1.0).is_ok());
    }
}
