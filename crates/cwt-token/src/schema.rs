//! Claim schema: canonical claim identifiers, their value constraints and
//! the legacy JWT short-name aliases.

/// Registered claims with a canonical integer identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ClaimId {
    Issuer = 1,
    Subject = 2,
    Audience = 3,
    ExpirationTime = 4,
    NotBefore = 5,
    IssuedAt = 6,
    CwtId = 7,
    Cnf = 9999,
}

impl ClaimId {
    /// Every registered claim.
    pub const ALL: [ClaimId; 8] = [
        ClaimId::Issuer,
        ClaimId::Subject,
        ClaimId::Audience,
        ClaimId::ExpirationTime,
        ClaimId::NotBefore,
        ClaimId::IssuedAt,
        ClaimId::CwtId,
        ClaimId::Cnf,
    ];

    /// The canonical integer identifier.
    pub fn id(self) -> i64 {
        self as i64
    }

    /// Look up a registered claim by its integer identifier.
    pub fn from_id(id: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|claim| claim.id() == id)
    }

    /// The legacy JWT short name, if the claim has one.
    pub fn alias(self) -> Option<&'static str> {
        JWT_ALIASES
            .iter()
            .find(|(_, claim)| *claim == self)
            .map(|(name, _)| *name)
    }

    /// Value constraint enforced when the claim is set.
    pub fn constraint(self) -> ValueKind {
        match self {
            ClaimId::Issuer | ClaimId::Subject | ClaimId::Audience => ValueKind::TextString,
            ClaimId::ExpirationTime | ClaimId::NotBefore | ClaimId::IssuedAt => {
                ValueKind::NumericNoTag
            }
            ClaimId::CwtId => ValueKind::ByteString,
            ClaimId::Cnf => ValueKind::Map,
        }
    }

    /// Whether the claim holds a point in time.
    pub fn is_time(self) -> bool {
        self.constraint() == ValueKind::NumericNoTag
    }
}

/// The kind of CBOR value a claim must carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    TextString,
    /// Integer or float with no semantic tag.
    NumericNoTag,
    ByteString,
    Map,
    Unconstrained,
}

/// Name of the string-keyed profile extension claim. Never aliased.
pub const PROFILE: &str = "profile";

const JWT_ALIASES: [(&str, ClaimId); 7] = [
    ("iss", ClaimId::Issuer),
    ("sub", ClaimId::Subject),
    ("aud", ClaimId::Audience),
    ("exp", ClaimId::ExpirationTime),
    ("nbf", ClaimId::NotBefore),
    ("iat", ClaimId::IssuedAt),
    ("cti", ClaimId::CwtId),
];

/// Constraint for a canonical integer identifier; unknown ids are unconstrained.
pub fn constraint_for(id: i64) -> ValueKind {
    ClaimId::from_id(id)
        .map(ClaimId::constraint)
        .unwrap_or(ValueKind::Unconstrained)
}

/// Resolve a legacy short name to its canonical claim.
pub fn resolve_alias(name: &str) -> Option<ClaimId> {
    JWT_ALIASES
        .iter()
        .find(|(alias, _)| *alias == name)
        .map(|(_, claim)| *claim)
}
