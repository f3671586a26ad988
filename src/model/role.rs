use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};
use utoipa::ToSchema;

#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, ToSchema, Display, EnumString, AsRefStr, EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    SuperAdmin = 1,
    Admin = 2,
    Cashier = 3,
    Employee = 4,
}

impl Role {
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(Role::SuperAdmin),
            2 => Some(Role::Admin),
            3 => Some(Role::Cashier),
            4 => Some(Role::Employee),
            _ => None,
        }
    }

    pub fn id(self) -> u8 {
        self as u8
    }
}

/// Platform administration: companies, global parameters.
pub const PLATFORM: &[Role] = &[Role::SuperAdmin];

/// Company management: users, employees, cycles, reports, audit.
pub const MANAGERS: &[Role] = &[Role::SuperAdmin, Role::Admin];

/// Everyone who handles money: payslip reads and payments.
pub const PAYROLL_STAFF: &[Role] = &[Role::SuperAdmin, Role::Admin, Role::Cashier];

pub const EVERYONE: &[Role] = &[Role::SuperAdmin, Role::Admin, Role::Cashier, Role::Employee];

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn id_round_trips_for_every_role() {
        for role in Role::iter() {
            assert_eq!(Role::from_id(role.id()), Some(role));
        }
    }

    #[test]
    fn unknown_ids_are_rejected() {
        assert_eq!(Role::from_id(0), None);
        assert_eq!(Role::from_id(5), None);
    }

    #[test]
    fn parses_wire_names() {
        assert_eq!("SUPER_ADMIN".parse::<Role>().unwrap(), Role::SuperAdmin);
        assert_eq!(Role::Cashier.to_string(), "CASHIER");
    }

    #[test]
    fn cashier_is_not_a_manager() {
        assert!(!MANAGERS.contains(&Role::Cashier));
        assert!(PAYROLL_STAFF.contains(&Role::Cashier));
        assert!(!PAYROLL_STAFF.contains(&Role::Employee));
    }
}
