use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }

        impl From<$name> for u64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

id_type!(
    /// Unified staffable person (BP employee, freelancer or internal employee).
    PersonnelId
);
id_type!(CaseId);
id_type!(ContractId);
id_type!(
    /// Supplier (business partner) company employing BP personnel.
    BpCompanyId
);
id_type!(ClientCompanyId);
id_type!(
    /// Internal sales representative responsible for a case.
    SalesRepId
);
id_type!(OrderId);
id_type!(RequestId);
id_type!(RequestItemId);
id_type!(BatchId);
