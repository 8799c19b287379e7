use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::domain::user::{Role, UserId};
use crate::workflow::states::{Actor, ApprovalStep};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuthorityFailure {
    UnassignedStep { step: ApprovalStep },
    MissingRole { required_role: Role },
    SelfDecision { user_id: UserId },
}

impl AuthorityFailure {
    fn reason(&self) -> String {
        match self {
            Self::UnassignedStep { step } => {
                format!("no level is assigned to approval step `{}`", step.as_str())
            }
            Self::MissingRole { required_role } => {
                format!("actor does not hold required level `{}`", required_role.as_str())
            }
            Self::SelfDecision { user_id } => {
                format!("user `{}` cannot decide their own application", user_id.0)
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityResult {
    pub allowed: bool,
    pub reason: String,
    pub failure: Option<AuthorityFailure>,
}

impl AuthorityResult {
    fn allow(reason: impl Into<String>) -> Self {
        Self { allowed: true, reason: reason.into(), failure: None }
    }

    fn deny(failure: AuthorityFailure) -> Self {
        Self { allowed: false, reason: failure.reason(), failure: Some(failure) }
    }
}

/// Decides whether an actor may resolve a given step or disburse funds.
#[derive(Clone, Debug)]
pub struct AuthorityValidator {
    step_owners: HashMap<ApprovalStep, Role>,
    disbursement_role: Role,
}

impl Default for AuthorityValidator {
    fn default() -> Self {
        Self::new(
            [ApprovalStep::DivisiSimpanPinjam, ApprovalStep::Ketua, ApprovalStep::Pengawas]
                .into_iter()
                .map(|step| (step, step.default_role()))
                .collect(),
            Role::Bendahara,
        )
    }
}

impl AuthorityValidator {
    pub fn new(step_owners: Vec<(ApprovalStep, Role)>, disbursement_role: Role) -> Self {
        Self { step_owners: step_owners.into_iter().collect(), disbursement_role }
    }

    pub fn role_for(&self, step: ApprovalStep) -> Option<Role> {
        self.step_owners.get(&step).copied()
    }

    pub fn disbursement_role(&self) -> Role {
        self.disbursement_role
    }

    pub fn validate_decision(
        &self,
        actor: &Actor,
        step: ApprovalStep,
        owner_id: &UserId,
    ) -> AuthorityResult {
        let Some(required_role) = self.role_for(step) else {
            return AuthorityResult::deny(AuthorityFailure::UnassignedStep { step });
        };

        if !actor.has_role(required_role) {
            return AuthorityResult::deny(AuthorityFailure::MissingRole { required_role });
        }

        if &actor.user_id == owner_id {
            return AuthorityResult::deny(AuthorityFailure::SelfDecision {
                user_id: actor.user_id.clone(),
            });
        }

        AuthorityResult::allow(format!(
            "user `{}` holds `{}` for step `{}`",
            actor.user_id.0,
            required_role.as_str(),
            step.as_str()
        ))
    }

    pub fn validate_disbursement(&self, actor: &Actor) -> AuthorityResult {
        if !actor.has_role(self.disbursement_role) {
            return AuthorityResult::deny(AuthorityFailure::MissingRole {
                required_role: self.disbursement_role,
            });
        }

        AuthorityResult::allow(format!(
            "user `{}` holds `{}` for disbursement",
            actor.user_id.0,
            self.disbursement_role.as_str()
        ))
    }
}
