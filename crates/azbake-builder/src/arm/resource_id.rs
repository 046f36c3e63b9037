//! Parsing of ARM resource ids and storage blob URIs

use super::error::ArmError;
use reqwest::Url;
use std::fmt;

/// Location of a managed disk, parsed from its ARM resource id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedDiskId {
    pub subscription_id: String,
    pub resource_group: String,
    pub name: String,
}

impl ManagedDiskId {
    /// Parse `/subscriptions/{sub}/resourceGroups/{rg}/providers/Microsoft.Compute/disks/{name}`.
    ///
    /// Segment names are matched case-insensitively; ARM returns both
    /// `resourceGroups` and `resourcegroups` depending on the API.
    pub fn parse(id: &str) -> Result<Self, ArmError> {
        let invalid = || ArmError::InvalidResponse(format!("Not a managed disk id: {id}"));

        let segments: Vec<&str> = id.trim_matches('/').split('/').collect();
        match segments.as_slice() {
            [subs, sub, rgs, rg, providers, namespace, disks, name]
                if subs.eq_ignore_ascii_case("subscriptions")
                    && rgs.eq_ignore_ascii_case("resourceGroups")
                    && providers.eq_ignore_ascii_case("providers")
                    && namespace.eq_ignore_ascii_case("Microsoft.Compute")
                    && disks.eq_ignore_ascii_case("disks")
                    && !sub.is_empty()
                    && !rg.is_empty()
                    && !name.is_empty() =>
            {
                Ok(Self {
                    subscription_id: (*sub).to_string(),
                    resource_group: (*rg).to_string(),
                    name: (*name).to_string(),
                })
            }
            _ => Err(invalid()),
        }
    }

    /// ARM path of this disk (without the endpoint)
    pub fn path(&self) -> String {
        format!(
            "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Compute/disks/{}",
            self.subscription_id, self.resource_group, self.name
        )
    }
}

impl fmt::Display for ManagedDiskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource_group, self.name)
    }
}

/// Location of an unmanaged VHD page blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobLocation {
    /// Full blob URL, query string stripped
    pub url: String,
    pub account: String,
    pub container: String,
    /// Blob name, may contain `/`
    pub blob: String,
}

impl BlobLocation {
    /// Parse `https://{account}.blob.core.windows.net/{container}/{blob...}`
    pub fn parse(uri: &str) -> Result<Self, ArmError> {
        let invalid = |why: &str| ArmError::InvalidResponse(format!("Invalid VHD URI {uri}: {why}"));

        let mut url = Url::parse(uri).map_err(|e| invalid(&e.to_string()))?;
        url.set_query(None);
        url.set_fragment(None);

        let host = url.host_str().ok_or_else(|| invalid("no host"))?;
        let account = host
            .split('.')
            .next()
            .filter(|a| !a.is_empty())
            .ok_or_else(|| invalid("no storage account"))?
            .to_string();

        let path = url.path().trim_start_matches('/');
        let (container, blob) = path
            .split_once('/')
            .filter(|(c, b)| !c.is_empty() && !b.is_empty())
            .ok_or_else(|| invalid("expected /<container>/<blob>"))?;

        Ok(Self {
            container: container.to_string(),
            blob: blob.to_string(),
            account,
            url: url.to_string(),
        })
    }
}

impl fmt::Display for BlobLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.account, self.container, self.blob)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_managed_disk_id() {
        let id = ManagedDiskId::parse(
            "/subscriptions/0000-1111/resourceGroups/bake-rg/providers/Microsoft.Compute/disks/osdisk-1",
        )
        .unwrap();
        assert_eq!(id.subscription_id, "0000-1111");
        assert_eq!(id.resource_group, "bake-rg");
        assert_eq!(id.name, "osdisk-1");
        assert_eq!(
            id.path(),
            "/subscriptions/0000-1111/resourceGroups/bake-rg/providers/Microsoft.Compute/disks/osdisk-1"
        );
    }

    #[test]
    fn parse_managed_disk_id_lowercase_segments() {
        let id = ManagedDiskId::parse(
            "/subscriptions/s/resourcegroups/RG/providers/microsoft.compute/disks/d",
        )
        .unwrap();
        assert_eq!(id.resource_group, "RG");
        assert_eq!(id.name, "d");
    }

    #[test]
    fn reject_non_disk_ids() {
        assert!(ManagedDiskId::parse("").is_err());
        assert!(
            ManagedDiskId::parse(
                "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/vm"
            )
            .is_err()
        );
        assert!(ManagedDiskId::parse("/subscriptions/s/resourceGroups/rg").is_err());
    }

    #[test]
    fn parse_blob_uri() {
        let blob = BlobLocation::parse(
            "https://bakestore.blob.core.windows.net/images/pkros/osdisk.vhd?sv=2020&sig=abc",
        )
        .unwrap();
        assert_eq!(blob.account, "bakestore");
        assert_eq!(blob.container, "images");
        assert_eq!(blob.blob, "pkros/osdisk.vhd");
        assert_eq!(
            blob.url,
            "https://bakestore.blob.core.windows.net/images/pkros/osdisk.vhd"
        );
    }

    #[test]
    fn reject_blob_uri_without_container() {
        assert!(BlobLocation::parse("https://bakestore.blob.core.windows.net/osdisk.vhd").is_err());
        assert!(BlobLocation::parse("not a url").is_err());
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn managed_disk_id_roundtrips_through_path(
                sub in "[a-f0-9-]{1,36}",
                rg in "[A-Za-z0-9_.-]{1,40}",
                name in "[A-Za-z0-9_-]{1,40}",
            ) {
                let id = ManagedDiskId {
                    subscription_id: sub,
                    resource_group: rg,
                    name,
                };
                prop_assert_eq!(ManagedDiskId::parse(&id.path()).unwrap(), id);
            }

            #[test]
            fn parse_never_panics(s in ".*") {
                let _ = ManagedDiskId::parse(&s);
                let _ = BlobLocation::parse(&s);
            }
        }
    }
}
