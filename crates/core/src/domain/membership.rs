use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::user::{EmployeeType, UserId};
use crate::validation::{Locale, ValidationErrors, Validator};
use crate::workflow::{ApplicationStatus, ApprovalStep};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemberApplicationId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberApplication {
    pub id: MemberApplicationId,
    pub user_id: UserId,
    #[serde(flatten)]
    pub employee: EmployeeDetails,
    pub status: ApplicationStatus,
    pub current_step: Option<ApprovalStep>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Employee data an applicant submits; becomes their employee record on approval.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeDetails {
    pub employee_number: String,
    pub full_name: String,
    pub department_id: String,
    pub golongan_id: String,
    pub employee_type: EmployeeType,
    pub phone: String,
    pub bank_account_number: String,
}

impl EmployeeDetails {
    pub fn validate(&self, locale: Locale) -> Result<(), ValidationErrors> {
        Validator::new(locale)
            .required("employeeNumber", &self.employee_number)
            .digits("employeeNumber", &self.employee_number)
            .max_length("employeeNumber", &self.employee_number, 20)
            .required("fullName", &self.full_name)
            .max_length("fullName", &self.full_name, 120)
            .required("departmentId", &self.department_id)
            .required("golonganId", &self.golongan_id)
            .required("phone", &self.phone)
            .digits("phone", &self.phone)
            .min_length("phone", &self.phone, 10)
            .max_length("phone", &self.phone, 15)
            .required("bankAccountNumber", &self.bank_account_number)
            .digits("bankAccountNumber", &self.bank_account_number)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::EmployeeDetails;
    use crate::domain::user::EmployeeType;
    use crate::validation::Locale;

    fn details() -> EmployeeDetails {
        EmployeeDetails {
            employee_number: "100234".to_string(),
            full_name: "Siti Rahma".to_string(),
            department_id: "dept-keuangan".to_string(),
            golongan_id: "gol-iii".to_string(),
            employee_type: EmployeeType::Permanent,
            phone: "081234567890".to_string(),
            bank_account_number: "0123456789".to_string(),
        }
    }

    #[test]
    fn complete_details_pass() {
        assert!(details().validate(Locale::Id).is_ok());
    }

    #[test]
    fn short_phone_and_alphanumeric_employee_number_fail() {
        let mut details = details();
        details.phone = "0812".to_string();
        details.employee_number = "EMP-1".to_string();

        let errors = details.validate(Locale::Id).expect_err("invalid");
        let fields: Vec<_> = errors.errors.iter().map(|error| error.field.as_str()).collect();
        assert_eq!(fields, vec!["employeeNumber", "phone"]);
        assert_eq!(errors.errors[1].message, "phone minimal 10 karakter");
    }
}
