use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

/// Levels a user can hold. Approval steps are owned by exactly one of these.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Employee,
    DivisiSimpanPinjam,
    Ketua,
    Pengawas,
    Bendahara,
    Payroll,
    SuperAdmin,
}

impl Role {
    pub const ALL: [Role; 7] = [
        Role::Employee,
        Role::DivisiSimpanPinjam,
        Role::Ketua,
        Role::Pengawas,
        Role::Bendahara,
        Role::Payroll,
        Role::SuperAdmin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Employee => "EMPLOYEE",
            Self::DivisiSimpanPinjam => "DIVISI_SIMPAN_PINJAM",
            Self::Ketua => "KETUA",
            Self::Pengawas => "PENGAWAS",
            Self::Bendahara => "BENDAHARA",
            Self::Payroll => "PAYROLL",
            Self::SuperAdmin => "SUPER_ADMIN",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "EMPLOYEE" => Some(Self::Employee),
            "DIVISI_SIMPAN_PINJAM" | "DSP" => Some(Self::DivisiSimpanPinjam),
            "KETUA" => Some(Self::Ketua),
            "PENGAWAS" => Some(Self::Pengawas),
            "BENDAHARA" => Some(Self::Bendahara),
            "PAYROLL" => Some(Self::Payroll),
            "SUPER_ADMIN" => Some(Self::SuperAdmin),
            _ => None,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Employee => "Karyawan / anggota koperasi",
            Self::DivisiSimpanPinjam => "Divisi Simpan Pinjam, first reviewer of every application",
            Self::Ketua => "Ketua koperasi",
            Self::Pengawas => "Pengawas, reviews large loans",
            Self::Bendahara => "Bendahara, disburses approved funds",
            Self::Payroll => "Payroll officer, runs monthly deductions",
            Self::SuperAdmin => "System administrator",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub employee_id: Option<String>,
    pub roles: Vec<Role>,
    pub is_verified: bool,
    pub is_member: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    pub fn has_any_role(&self, roles: &[Role]) -> bool {
        roles.iter().any(|role| self.has_role(*role))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EmployeeType {
    Permanent,
    Contract,
}

impl EmployeeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Permanent => "PERMANENT",
            Self::Contract => "CONTRACT",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "PERMANENT" => Some(Self::Permanent),
            "CONTRACT" => Some(Self::Contract),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Employee {
    pub id: String,
    pub employee_number: String,
    pub full_name: String,
    pub department_id: String,
    pub golongan_id: String,
    pub employee_type: EmployeeType,
    pub phone: Option<String>,
    pub bank_account_number: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Department {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Pay grade. `max_loan_amount` bounds the principal of any single loan.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Golongan {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub max_loan_amount: rust_decimal::Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Level {
    pub role: Role,
    pub description: String,
}
