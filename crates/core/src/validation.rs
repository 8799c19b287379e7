//! Field-level request validation with localized messages.
//!
//! Handlers build a [`Validator`], chain the constraints for each field and call
//! [`Validator::finish`]. All failures are collected, so a client sees every
//! problem with its payload in one 400 response.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    Id,
    En,
}

impl Locale {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "id" | "id-id" => Some(Self::Id),
            "en" | "en-us" | "en-gb" => Some(Self::En),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self { field: field.into(), message: message.into() }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationErrors {
    pub errors: Vec<FieldError>,
}

impl ValidationErrors {
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self { errors: vec![FieldError::new(field, message)] }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn messages(&self) -> Vec<String> {
        self.errors.iter().map(|error| error.message.clone()).collect()
    }
}

impl From<Vec<FieldError>> for ValidationErrors {
    fn from(errors: Vec<FieldError>) -> Self {
        Self { errors }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.messages().join("; "))
    }
}

enum Rule<'a> {
    Required,
    MinLength(usize),
    MaxLength(usize),
    Digits,
    Email,
    Positive,
    AtMost(&'a Decimal),
    Between(u32, u32),
    OneOf(&'a str),
}

fn render(locale: Locale, field: &str, rule: Rule<'_>) -> String {
    match (locale, rule) {
        (Locale::Id, Rule::Required) => format!("{field} wajib diisi"),
        (Locale::En, Rule::Required) => format!("{field} should not be empty"),
        (Locale::Id, Rule::MinLength(min)) => format!("{field} minimal {min} karakter"),
        (Locale::En, Rule::MinLength(min)) => {
            format!("{field} must be longer than or equal to {min} characters")
        }
        (Locale::Id, Rule::MaxLength(max)) => format!("{field} maksimal {max} karakter"),
        (Locale::En, Rule::MaxLength(max)) => {
            format!("{field} must be shorter than or equal to {max} characters")
        }
        (Locale::Id, Rule::Digits) => format!("{field} hanya boleh berisi angka"),
        (Locale::En, Rule::Digits) => format!("{field} must contain only digits"),
        (Locale::Id, Rule::Email) => format!("{field} harus berupa alamat email yang valid"),
        (Locale::En, Rule::Email) => format!("{field} must be an email"),
        (Locale::Id, Rule::Positive) => format!("{field} harus lebih besar dari 0"),
        (Locale::En, Rule::Positive) => format!("{field} must be a positive number"),
        (Locale::Id, Rule::AtMost(max)) => format!("{field} tidak boleh melebihi {max}"),
        (Locale::En, Rule::AtMost(max)) => format!("{field} must not be greater than {max}"),
        (Locale::Id, Rule::Between(min, max)) => {
            format!("{field} harus di antara {min} dan {max}")
        }
        (Locale::En, Rule::Between(min, max)) => {
            format!("{field} must be between {min} and {max}")
        }
        (Locale::Id, Rule::OneOf(allowed)) => format!("{field} harus salah satu dari: {allowed}"),
        (Locale::En, Rule::OneOf(allowed)) => {
            format!("{field} must be one of the following values: {allowed}")
        }
    }
}

#[derive(Debug)]
pub struct Validator {
    locale: Locale,
    errors: Vec<FieldError>,
}

impl Validator {
    pub fn new(locale: Locale) -> Self {
        Self { locale, errors: Vec::new() }
    }

    fn push(&mut self, field: &str, rule: Rule<'_>) {
        let message = render(self.locale, field, rule);
        self.errors.push(FieldError::new(field, message));
    }

    pub fn required(&mut self, field: &str, value: &str) -> &mut Self {
        if value.trim().is_empty() {
            self.push(field, Rule::Required);
        }
        self
    }

    pub fn required_some<T>(&mut self, field: &str, value: Option<&T>) -> &mut Self {
        if value.is_none() {
            self.push(field, Rule::Required);
        }
        self
    }

    pub fn min_length(&mut self, field: &str, value: &str, min: usize) -> &mut Self {
        if value.chars().count() < min {
            self.push(field, Rule::MinLength(min));
        }
        self
    }

    pub fn max_length(&mut self, field: &str, value: &str, max: usize) -> &mut Self {
        if value.chars().count() > max {
            self.push(field, Rule::MaxLength(max));
        }
        self
    }

    pub fn digits(&mut self, field: &str, value: &str) -> &mut Self {
        if !value.is_empty() && !value.chars().all(|ch| ch.is_ascii_digit()) {
            self.push(field, Rule::Digits);
        }
        self
    }

    pub fn email(&mut self, field: &str, value: &str) -> &mut Self {
        if !looks_like_email(value) {
            self.push(field, Rule::Email);
        }
        self
    }

    pub fn positive(&mut self, field: &str, value: Decimal) -> &mut Self {
        if value <= Decimal::ZERO {
            self.push(field, Rule::Positive);
        }
        self
    }

    pub fn at_most(&mut self, field: &str, value: Decimal, max: Decimal) -> &mut Self {
        if value > max {
            self.push(field, Rule::AtMost(&max));
        }
        self
    }

    pub fn between(&mut self, field: &str, value: u32, min: u32, max: u32) -> &mut Self {
        if value < min || value > max {
            self.push(field, Rule::Between(min, max));
        }
        self
    }

    pub fn one_of<T: PartialEq + fmt::Display>(
        &mut self,
        field: &str,
        value: &T,
        allowed: &[T],
    ) -> &mut Self {
        if !allowed.contains(value) {
            let listed = allowed.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ");
            self.push(field, Rule::OneOf(&listed));
        }
        self
    }

    pub fn custom(&mut self, field: &str, message: impl Into<String>) -> &mut Self {
        self.errors.push(FieldError::new(field, message));
        self
    }

    pub fn finish(&mut self) -> Result<(), ValidationErrors> {
        if self.errors.is_empty() {
            return Ok(());
        }
        Err(ValidationErrors { errors: std::mem::take(&mut self.errors) })
    }
}

fn looks_like_email(value: &str) -> bool {
    let Some((local, domain)) = value.trim().split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.split('.').count() >= 2
        && domain.split('.').all(|label| !label.is_empty())
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{Locale, Validator};

    #[test]
    fn collects_every_failing_field() {
        let result = Validator::new(Locale::Id)
            .required("name", "  ")
            .email("email", "not-an-email")
            .positive("amount", Decimal::ZERO)
            .between("tenor", 48, 1, 36)
            .finish();

        let errors = result.expect_err("four failures");
        assert_eq!(errors.errors.len(), 4);
        assert_eq!(errors.errors[0].message, "name wajib diisi");
        assert_eq!(errors.errors[3].field, "tenor");
    }

    #[test]
    fn english_messages_follow_locale() {
        let errors = Validator::new(Locale::En)
            .required("email", "")
            .finish()
            .expect_err("required");
        assert_eq!(errors.messages(), vec!["email should not be empty".to_string()]);
    }

    #[test]
    fn digits_and_one_of_rules() {
        let errors = Validator::new(Locale::En)
            .digits("employeeNumber", "EMP-01")
            .one_of("tenor", &7u32, &[6, 12, 24])
            .finish()
            .expect_err("both fail");
        assert_eq!(errors.errors.len(), 2);
        assert!(errors.errors[1].message.contains("6, 12, 24"));
    }

    #[test]
    fn valid_input_passes() {
        assert!(Validator::new(Locale::Id)
            .required("name", "Siti")
            .email("email", "siti@koperasi.co.id")
            .digits("phone", "08123")
            .at_most("amount", Decimal::new(10, 0), Decimal::new(10, 0))
            .finish()
            .is_ok());
    }

    #[test]
    fn locale_parses_common_tags() {
        assert_eq!(Locale::parse("EN-us"), Some(Locale::En));
        assert_eq!(Locale::parse("id"), Some(Locale::Id));
        assert_eq!(Locale::parse("fr"), None);
    }
}
