use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::errors::with_timeout;
use crate::{
    BearerCredential, DirectoryService, OrganizationListing, OrganizationRecord, Prompt,
    PromptOption, SessionError,
};

pub const ORGANIZATION_PLACEHOLDER: &str = "Select your Azure DevOps organization";
pub const OWNED_GROUP_LABEL: &str = "Owned organizations";
pub const MEMBER_GROUP_LABEL: &str = "Member organizations";

/// Owned and member organizations with duplicates removed. An organization the
/// principal both owns and belongs to is listed once, as owned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergedOrganizations {
    owned: Vec<OrganizationRecord>,
    member: Vec<OrganizationRecord>,
}

impl MergedOrganizations {
    pub fn merge(listing: OrganizationListing) -> Self {
        let mut seen = BTreeSet::new();
        let owned = listing
            .owned
            .into_iter()
            .filter(|record| seen.insert(record.id.clone()))
            .collect::<Vec<_>>();
        let member = listing
            .member
            .into_iter()
            .filter(|record| seen.insert(record.id.clone()))
            .collect::<Vec<_>>();
        Self { owned, member }
    }

    pub fn owned(&self) -> &[OrganizationRecord] {
        &self.owned
    }

    pub fn member(&self) -> &[OrganizationRecord] {
        &self.member
    }

    pub fn len(&self) -> usize {
        self.owned.len() + self.member.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Owned entries first, each non-empty group introduced by a separator.
    pub fn prompt_options(&self) -> Vec<PromptOption> {
        let mut options = Vec::with_capacity(self.len());
        for (group, records) in [
            (OWNED_GROUP_LABEL, &self.owned),
            (MEMBER_GROUP_LABEL, &self.member),
        ] {
            for (index, record) in records.iter().enumerate() {
                let option = PromptOption::new(record.display_name.clone());
                options.push(if index == 0 {
                    option.starting_group(group)
                } else {
                    option
                });
            }
        }
        options
    }

    /// First match by display name, scanning owned before member.
    pub fn find_by_display_name(&self, label: &str) -> Option<&OrganizationRecord> {
        self.owned
            .iter()
            .chain(self.member.iter())
            .find(|record| record.display_name == label)
    }
}

/// Lists the organizations a credential can reach and asks the user to pick one.
pub struct OrganizationResolver {
    directory: Arc<dyn DirectoryService>,
    prompt: Arc<dyn Prompt>,
    network_timeout: Duration,
}

impl OrganizationResolver {
    pub fn new(
        directory: Arc<dyn DirectoryService>,
        prompt: Arc<dyn Prompt>,
        network_timeout: Duration,
    ) -> Self {
        Self {
            directory,
            prompt,
            network_timeout,
        }
    }

    /// Starts a resolution that lists organizations at most once, however many
    /// times it prompts.
    pub fn begin<'a>(&'a self, credential: &'a BearerCredential) -> ResolutionAttempt<'a> {
        ResolutionAttempt {
            resolver: self,
            credential,
            organizations: None,
        }
    }

    pub async fn resolve(
        &self,
        credential: &BearerCredential,
    ) -> Result<OrganizationRecord, SessionError> {
        self.begin(credential).choose().await
    }

    async fn load(&self, credential: &BearerCredential) -> Result<MergedOrganizations, SessionError> {
        let profile = with_timeout(
            "profile lookup",
            self.network_timeout,
            self.directory.get_profile(credential),
        )
        .await?
        .map_err(|error| SessionError::DirectoryFailed {
            operation: "profile lookup",
            message: error.to_string(),
        })?;

        let listing = with_timeout(
            "organization listing",
            self.network_timeout,
            self.directory.list_organizations(credential, &profile.alias),
        )
        .await?
        .map_err(|error| SessionError::DirectoryFailed {
            operation: "organization listing",
            message: error.to_string(),
        })?;

        let organizations = MergedOrganizations::merge(listing);
        debug!(
            owned = organizations.owned().len(),
            member = organizations.member().len(),
            "listed organizations"
        );
        Ok(organizations)
    }
}

/// A single pass through organization resolution, caching the directory listing.
pub struct ResolutionAttempt<'a> {
    resolver: &'a OrganizationResolver,
    credential: &'a BearerCredential,
    organizations: Option<MergedOrganizations>,
}

impl ResolutionAttempt<'_> {
    pub async fn organizations(&mut self) -> Result<&MergedOrganizations, SessionError> {
        if self.organizations.is_none() {
            let loaded = self.resolver.load(self.credential).await?;
            self.organizations = Some(loaded);
        }
        Ok(self.organizations.get_or_insert_with(MergedOrganizations::default))
    }

    /// Prompts for an organization. An empty listing still prompts so the user
    /// sees that nothing is available.
    pub async fn choose(&mut self) -> Result<OrganizationRecord, SessionError> {
        let options = self.organizations().await?.prompt_options();
        let Some(label) = self
            .resolver
            .prompt
            .choose(ORGANIZATION_PLACEHOLDER, &options)
            .await
        else {
            return Err(SessionError::SelectionRequired(
                "No organization selected".to_string(),
            ));
        };

        self.organizations()
            .await?
            .find_by_display_name(&label)
            .cloned()
            .ok_or_else(|| {
                SessionError::SelectionRequired(format!(
                    "organization \"{label}\" is not one of the listed organizations"
                ))
            })
    }
}
