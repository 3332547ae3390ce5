use serde::{Deserialize, Serialize};

/// Closed set of roles known to the service.
///
/// The same enumeration drives registry group subscriptions and the
/// dispatcher routing tables, so a typo cannot create an unroutable group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Preparateur,
    ImprimeurRoland,
    ImprimeurXerox,
    Livreur,
    Admin,
}

impl UserRole {
    pub const ALL: [UserRole; 5] = [
        UserRole::Preparateur,
        UserRole::ImprimeurRoland,
        UserRole::ImprimeurXerox,
        UserRole::Livreur,
        UserRole::Admin,
    ];

    /// Wire tag for this role, identical to the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Preparateur => "preparateur",
            UserRole::ImprimeurRoland => "imprimeur_roland",
            UserRole::ImprimeurXerox => "imprimeur_xerox",
            UserRole::Livreur => "livreur",
            UserRole::Admin => "admin",
        }
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Printing machine a dossier is assigned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Machine {
    Roland,
    Xerox,
}

impl Machine {
    /// Operator group responsible for this machine.
    pub fn operator_role(&self) -> UserRole {
        match self {
            Machine::Roland => UserRole::ImprimeurRoland,
            Machine::Xerox => UserRole::ImprimeurXerox,
        }
    }
}

impl std::fmt::Display for Machine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Machine::Roland => f.write_str("Roland"),
            Machine::Xerox => f.write_str("Xerox"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_wire_tags() {
        assert_eq!(
            serde_json::to_string(&UserRole::ImprimeurRoland).unwrap(),
            "\"imprimeur_roland\""
        );
        assert_eq!(
            serde_json::from_str::<UserRole>("\"livreur\"").unwrap(),
            UserRole::Livreur
        );
        for role in UserRole::ALL {
            let json = serde_json::to_string(&role).unwrap();
            assert_eq!(json, format!("\"{}\"", role.as_str()));
        }
    }

    #[test]
    fn test_unknown_role_rejected() {
        assert!(serde_json::from_str::<UserRole>("\"imprimeur_hp\"").is_err());
    }

    #[test]
    fn test_machine_operator_role() {
        assert_eq!(Machine::Roland.operator_role(), UserRole::ImprimeurRoland);
        assert_eq!(Machine::Xerox.operator_role(), UserRole::ImprimeurXerox);
    }

    #[test]
    fn test_machine_wire_tags() {
        assert_eq!(serde_json::to_string(&Machine::Roland).unwrap(), "\"Roland\"");
        assert_eq!(
            serde_json::from_str::<Machine>("\"Xerox\"").unwrap(),
            Machine::Xerox
        );
    }
}
