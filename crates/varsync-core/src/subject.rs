//! Bus subject namespace
//!
//! Every subject starts with `v1.loc`. Per-provider subjects insert the
//! provider id as the third token; registry subjects live under
//! `v1.loc.registry.providers`. These strings are wire contract.

use crate::ProviderId;

pub const VERSION_PREFIX: &str = "v1";
pub const LOCATION_PREFIX: &str = "loc";

const REGISTRY_PROVIDERS: &str = "registry.providers";

/// Per-provider message kinds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SubjectKind {
    /// Periodic full-state broadcast
    VariablesChanged,
    /// Snapshot request/reply
    ReadVariables,
    /// Write command
    WriteVariables,
    /// Definition announcement by the provider
    DefinitionChanged,
    /// Registry validation notification for the provider
    RegistryDefinitionChanged,
    /// Registry lookup of the provider definition
    RegistryDefinitionQuery,
}

impl SubjectKind {
    const ALL: [SubjectKind; 6] = [
        SubjectKind::VariablesChanged,
        SubjectKind::ReadVariables,
        SubjectKind::WriteVariables,
        SubjectKind::DefinitionChanged,
        SubjectKind::RegistryDefinitionChanged,
        SubjectKind::RegistryDefinitionQuery,
    ];

    fn suffix(self) -> &'static str {
        match self {
            SubjectKind::VariablesChanged => "vars.evt.changed",
            SubjectKind::ReadVariables => "vars.qry.read",
            SubjectKind::WriteVariables => "vars.cmd.write",
            SubjectKind::DefinitionChanged
            | SubjectKind::RegistryDefinitionChanged => "def.evt.changed",
            SubjectKind::RegistryDefinitionQuery => "def.qry.read",
        }
    }

    fn is_registry_scoped(self) -> bool {
        matches!(
            self,
            SubjectKind::RegistryDefinitionChanged | SubjectKind::RegistryDefinitionQuery
        )
    }

    /// Routing key for this kind of message about `provider`
    pub fn subject(self, provider: &ProviderId) -> String {
        if self.is_registry_scoped() {
            format!(
                "{}.{}.{}.{}.{}",
                VERSION_PREFIX,
                LOCATION_PREFIX,
                REGISTRY_PROVIDERS,
                provider,
                self.suffix()
            )
        } else {
            format!(
                "{}.{}.{}.{}",
                VERSION_PREFIX,
                LOCATION_PREFIX,
                provider,
                self.suffix()
            )
        }
    }

    /// Wildcard pattern matching this kind for every provider
    pub fn wildcard(self) -> String {
        self.subject(&ProviderId::new("*"))
    }

    /// Recover provider and kind from a concrete subject
    pub fn parse(subject: &str) -> Option<(ProviderId, SubjectKind)> {
        let tokens: Vec<&str> = subject.split('.').collect();
        if tokens.len() < 3 || tokens[0] != VERSION_PREFIX || tokens[1] != LOCATION_PREFIX {
            return None;
        }

        let (provider, rest) = if tokens[2] == "registry" {
            if tokens.len() != 8 || tokens[3] != "providers" {
                return None;
            }
            (tokens[4], &tokens[5..])
        } else {
            if tokens.len() != 6 {
                return None;
            }
            (tokens[2], &tokens[3..])
        };

        let suffix = rest.join(".");
        let registry = tokens[2] == "registry";
        SubjectKind::ALL
            .into_iter()
            .find(|k| k.is_registry_scoped() == registry && k.suffix() == suffix)
            .map(|k| (ProviderId::new(provider), k))
    }
}

pub fn vars_changed_event(provider: &ProviderId) -> String {
    SubjectKind::VariablesChanged.subject(provider)
}

pub fn read_variables_query(provider: &ProviderId) -> String {
    SubjectKind::ReadVariables.subject(provider)
}

pub fn write_variables_command(provider: &ProviderId) -> String {
    SubjectKind::WriteVariables.subject(provider)
}

pub fn provider_definition_changed_event(provider: &ProviderId) -> String {
    SubjectKind::DefinitionChanged.subject(provider)
}

pub fn registry_provider_event(provider: &ProviderId) -> String {
    SubjectKind::RegistryDefinitionChanged.subject(provider)
}

pub fn registry_provider_query(provider: &ProviderId) -> String {
    SubjectKind::RegistryDefinitionQuery.subject(provider)
}

pub fn registry_providers_query() -> String {
    format!(
        "{}.{}.{}.qry.read",
        VERSION_PREFIX, LOCATION_PREFIX, REGISTRY_PROVIDERS
    )
}

pub fn registry_providers_changed_event() -> String {
    format!(
        "{}.{}.{}.evt.changed",
        VERSION_PREFIX, LOCATION_PREFIX, REGISTRY_PROVIDERS
    )
}
