//! Personal details owned by exactly one principal.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationErrors};

use aeternum_core::DomainError;
use aeternum_core::DomainResult;
use aeternum_core::error::require_non_empty;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Profile {
    #[validate(length(min = 1, max = 50, message = "first name must be 1 to 50 characters"))]
    pub first_name: String,

    #[validate(length(min = 1, max = 50, message = "last name must be 1 to 50 characters"))]
    pub last_name: String,

    pub date_of_birth: NaiveDate,

    #[validate(url(message = "profile picture URL must be a valid URL"))]
    pub profile_picture_url: Option<String>,

    #[validate(length(max = 100, message = "street address must not exceed 100 characters"))]
    pub street_address: Option<String>,

    #[validate(length(max = 50, message = "city must not exceed 50 characters"))]
    pub city: Option<String>,

    #[validate(length(max = 10, message = "postal code must not exceed 10 characters"))]
    pub postal_code: Option<String>,

    #[validate(length(max = 50, message = "country must not exceed 50 characters"))]
    pub country: Option<String>,
}

impl Profile {
    pub fn new(first_name: &str, last_name: &str, date_of_birth: NaiveDate) -> Self {
        Self {
            first_name: first_name.trim().to_string(),
            last_name: last_name.trim().to_string(),
            date_of_birth,
            profile_picture_url: None,
            street_address: None,
            city: None,
            postal_code: None,
            country: None,
        }
    }

    /// Run the field rules and the required-name checks.
    pub fn ensure_valid(&self) -> DomainResult<()> {
        require_non_empty("first name", &self.first_name)?;
        require_non_empty("last name", &self.last_name)?;
        self.validate().map_err(validation_failure)
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn update_names(&mut self, first_name: &str, last_name: &str) {
        self.first_name = first_name.trim().to_string();
        self.last_name = last_name.trim().to_string();
    }

    pub fn update_address(
        &mut self,
        street_address: Option<String>,
        city: Option<String>,
        postal_code: Option<String>,
        country: Option<String>,
    ) {
        self.street_address = street_address;
        self.city = city;
        self.postal_code = postal_code;
        self.country = country;
    }

    pub fn reset_profile_picture(&mut self) {
        self.profile_picture_url = None;
    }
}

/// Flatten `validator` output into a single deterministic message.
pub(crate) fn validation_failure(errors: ValidationErrors) -> DomainError {
    let mut messages: Vec<String> = errors
        .field_errors()
        .into_iter()
        .flat_map(|(field, errs)| {
            errs.iter().map(move |e| match &e.message {
                Some(message) => message.to_string(),
                None => format!("{field} is invalid ({})", e.code),
            })
        })
        .collect();
    messages.sort();
    DomainError::validation(messages.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn profile() -> Profile {
        Profile::new(
            "Alice",
            "Novak",
            NaiveDate::from_ymd_opt(1990, 5, 17).unwrap(),
        )
    }

    #[test]
    fn valid_profile_passes() {
        let mut p = profile();
        p.profile_picture_url = Some("https://cdn.example.com/alice.png".into());
        p.update_address(
            Some("Main Street 1".into()),
            Some("Prague".into()),
            Some("11000".into()),
            Some("Czechia".into()),
        );
        assert!(p.ensure_valid().is_ok());
        assert_eq!(p.full_name(), "Alice Novak");
    }

    #[test]
    fn malformed_picture_url_is_rejected() {
        let mut p = profile();
        p.profile_picture_url = Some("not a url".into());
        let err = p.ensure_valid().unwrap_err();
        assert_eq!(
            err,
            DomainError::validation("profile picture URL must be a valid URL")
        );
        p.reset_profile_picture();
        assert!(p.ensure_valid().is_ok());
    }

    #[test]
    fn blank_first_name_is_rejected() {
        let mut p = profile();
        p.update_names("  ", "Novak");
        let err = p.ensure_valid().unwrap_err();
        assert_eq!(err, DomainError::validation("first name cannot be empty"));
    }

    #[test]
    fn several_violations_are_reported_together() {
        let mut p = profile();
        p.postal_code = Some("12345678901".into());
        p.country = Some("c".repeat(51));
        let err = p.ensure_valid().unwrap_err();
        assert_eq!(
            err,
            DomainError::validation(
                "country must not exceed 50 characters, postal code must not exceed 10 characters"
            )
        );
    }

    proptest! {
        #[test]
        fn first_name_limit_is_fifty_characters(len in 1usize..80) {
            let mut p = profile();
            p.first_name = "a".repeat(len);
            prop_assert_eq!(p.ensure_valid().is_ok(), len <= 50);
        }
    }
}
