use crate::config::SvdConfig;
use crate::error::{Result, SvdError};
use crate::models::Rating;

fn invalid(message: String) -> SvdError {
    SvdError::InvalidConfiguration(message)
}

pub fn validate_config(config: &SvdConfig) -> Result<()> {
    if !config.learning_rate.is_finite() || config.learning_rate <= 0.0 {
        return Err(invalid(format!(
            "learning_rate must be a finite value > 0, got {}",
            config.learning_rate
        )));
    }

    if !config.regularization.is_finite() || config.regularization < 0.0 {
        return Err(invalid(format!(
            "regularization must be a finite value >= 0, got {}",
            config.regularization
        )));
    }

    if config.n_epochs < 1 {
        return Err(invalid("n_epochs must be at least 1".to_string()));
    }

    if !config.min_rating.is_finite() || !config.max_rating.is_finite() {
        return Err(invalid("rating bounds must be finite".to_string()));
    }

    if config.min_rating > config.max_rating {
        return Err(invalid(format!(
            "min_rating ({}) exceeds max_rating ({})",
            config.min_rating, config.max_rating
        )));
    }

    if !config.init_mean.is_finite() {
        return Err(invalid("init_mean must be finite".to_string()));
    }

    if !config.init_std_dev.is_finite() || config.init_std_dev < 0.0 {
        return Err(invalid(format!(
            "init_std_dev must be a finite value >= 0, got {}",
            config.init_std_dev
        )));
    }

    if config.patience < 1 {
        return Err(invalid("patience must be at least 1".to_string()));
    }

    if let Some(tolerance) = config.convergence_tolerance {
        if !tolerance.is_finite() || tolerance < 0.0 {
            return Err(invalid(format!(
                "convergence_tolerance must be a finite value >= 0, got {}",
                tolerance
            )));
        }
    }

    Ok(())
}

pub fn validate_ratings(ratings: &[Rating]) -> Result<()> {
    for (index, record) in ratings.iter().enumerate() {
        if !record.rating.is_finite() {
            return Err(SvdError::InvalidRecord {
                index,
                reason: format!("rating {} is not finite", record.rating),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&SvdConfig::default()).is_ok());
    }

    #[test]
    fn test_rejects_bad_learning_rate() {
        let config = SvdConfig::default().with_learning_rate(0.0);
        assert!(matches!(
            validate_config(&config),
            Err(SvdError::InvalidConfiguration(_))
        ));
        let config = SvdConfig::default().with_learning_rate(f64::NAN);
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_rejects_negative_regularization() {
        let config = SvdConfig::default().with_regularization(-0.1);
        assert!(validate_config(&config).is_err());
        let config = SvdConfig::default().with_regularization(0.0);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_rejects_inverted_rating_range() {
        let config = SvdConfig::default().with_rating_range(5.0, 1.0);
        assert!(validate_config(&config).is_err());
        let config = SvdConfig::default().with_rating_range(3.0, 3.0);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_rejects_zero_epochs() {
        let config = SvdConfig::default().with_epochs(0);
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_zero_factors_allowed() {
        let config = SvdConfig::default().with_factors(0);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_rejects_zero_patience() {
        let config = SvdConfig::default().with_patience(0);
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_ratings() {
        let ratings = vec![Rating::new(1, 1, 4.0), Rating::new(1, 2, f64::INFINITY)];
        match validate_ratings(&ratings) {
            Err(SvdError::InvalidRecord { index, .. }) => assert_eq!(index, 1),
            other => panic!("expected InvalidRecord, got {:?}", other),
        }
        assert!(validate_ratings(&ratings[..1]).is_ok());
    }
}
