//! Server-wide settings and the IP network groups later ACLs point at.

use crate::core::decode;
use crate::core::error::Result;
use crate::core::migration::{Migrator, Outcome, StepContext, WholeGraph};
use crate::core::namespace::{NsValue, global};
use crate::core::refs::{EntityKind, EntityRef};
use crate::steps::{each_object, server_info};
use regex::Regex;
use rusqlite::params;
use serde_json::json;
use std::collections::{BTreeSet, HashSet};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::LazyLock;

static IPV4_MASK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9.]+$").unwrap());
static IPV6_MASK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9a-fA-F:]+$").unwrap());

const FULL_ACCESS_GROUP: &str = "Full Attachment Access";

/// Turn a legacy address mask into a CIDR network. Masks are address
/// prefixes: `128.141.` means `128.141.0.0/16`.
pub fn to_network(mask: &str) -> Option<String> {
    let mask = mask.trim();
    if IPV4_MASK.is_match(mask) {
        let segments: Vec<&str> = mask.trim_end_matches('.').split('.').collect();
        if segments.len() > 4 || segments.iter().any(|s| s.is_empty()) {
            return None;
        }
        let mut octets = [0u8; 4];
        for (i, s) in segments.iter().enumerate() {
            octets[i] = s.parse().ok()?;
        }
        Some(format!("{}/{}", Ipv4Addr::from(octets), 8 * segments.len()))
    } else if IPV6_MASK.is_match(mask) {
        let trimmed = mask.trim_end_matches(':');
        if trimmed.contains("::") {
            return mask.parse::<Ipv6Addr>().ok().map(|a| format!("{}/128", a));
        }
        let segments: Vec<&str> = trimmed.split(':').collect();
        if segments.len() > 8 || segments.iter().any(|s| s.is_empty()) {
            return None;
        }
        let mut words = [0u16; 8];
        for (i, s) in segments.iter().enumerate() {
            words[i] = u16::from_str_radix(s, 16).ok()?;
        }
        Some(format!("{}/{}", Ipv6Addr::from(words), 16 * segments.len()))
    } else {
        None
    }
}

pub struct GlobalPreEvents {
    ctx: StepContext,
    group_names: HashSet<String>,
}

pub fn build(ctx: &StepContext) -> Result<Box<dyn Migrator<WholeGraph>>> {
    Ok(Box::new(GlobalPreEvents {
        ctx: ctx.clone(),
        group_names: HashSet::new(),
    }))
}

impl GlobalPreEvents {
    fn networks(&self, masks: &[String], context: &str) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        for mask in masks {
            match to_network(mask) {
                Some(net) => {
                    out.insert(net);
                }
                None => self
                    .ctx
                    .log
                    .warning(&format!("Skipped invalid mask '{}' in {}", mask, context)),
            }
        }
        out
    }

    /// Names are unique case-insensitively; clashes get a numeric suffix.
    fn unique_name(&mut self, name: &str) -> String {
        let mut candidate = name.to_string();
        let mut n = 0;
        while !self.group_names.insert(candidate.to_lowercase()) {
            candidate = format!("{}-{}", name, n);
            n += 1;
        }
        candidate
    }

    fn create_network_group(
        &mut self,
        name: &str,
        description: &str,
        hidden: bool,
        networks: &BTreeSet<String>,
    ) -> Result<i64> {
        let name = self.unique_name(name);
        let id = self.ctx.dest.insert(
            "INSERT INTO ip_network_groups (name, description, hidden, attachment_access_override)
             VALUES (?1, ?2, ?3, ?4)",
            params![name, description, hidden, hidden],
        )?;
        for net in networks {
            self.ctx.dest.execute(
                "INSERT INTO ip_networks (group_id, network) VALUES (?1, ?2)",
                params![id, net],
            )?;
        }
        Ok(id)
    }

    fn migrate_settings(&self) -> Result<()> {
        let info = server_info(self.ctx.graph.as_ref())?;
        let dest = &self.ctx.dest;
        dest.set_setting("core", "site_title", &json!(info.title))?;
        dest.set_setting("core", "site_organization", &json!(info.organisation))?;
        dest.set_setting("core", "timezone", &json!(info.timezone))?;
        dest.set_setting("core", "default_locale", &json!(info.language))?;
        dest.set_setting("payment", "currency", &json!(self.ctx.config.default_currency))?;
        dest.set_setting("event", "reference_types", &json!(self.ctx.config.reference_types))?;
        self.ctx.log.info(&format!("Site settings for '{}'", info.title));
        Ok(())
    }

    fn migrate_full_access(&mut self) -> Result<()> {
        let info = server_info(self.ctx.graph.as_ref())?;
        if info.full_access_networks.is_empty() {
            return Ok(());
        }
        let networks = self.networks(&info.full_access_networks, "full access list");
        if networks.is_empty() {
            self.ctx.log.error("No valid IPs found");
            return Ok(());
        }
        self.create_network_group(
            FULL_ACCESS_GROUP,
            "IPs that can access all attachments without authentication",
            true,
            &networks,
        )?;
        self.ctx
            .log
            .success(&format!("Full attachment access for {} networks", networks.len()));
        Ok(())
    }

    fn migrate_domains(&mut self) -> Result<()> {
        let ctx = self.ctx.clone();
        let graph = ctx.graph.as_ref();
        each_object(&ctx, graph, "Domains", graph.collection("domains")?, |obj| {
            let domain = decode::domain(&obj);
            let networks = self.networks(&domain.masks, &format!("domain {}", domain.name));
            if networks.is_empty() {
                ctx.log
                    .warning(&format!("Domain has no valid IPs: {}", domain.name));
            }
            let id = self.create_network_group(&domain.name, &domain.description, false, &networks)?;
            ctx.global.borrow_mut().insert(
                global::IP_DOMAINS,
                NsValue::from(domain.name.to_lowercase()),
                EntityRef::new(EntityKind::IpNetworkGroup, id),
            )?;
            ctx.log.info(&format!("Domain {} ({} networks)", domain.name, networks.len()));
            Ok(())
        })
    }
}

impl Migrator<WholeGraph> for GlobalPreEvents {
    fn name(&self) -> &'static str {
        "global_pre_events"
    }

    fn run(&mut self, _unit: &mut WholeGraph) -> Result<Outcome> {
        self.migrate_settings()?;
        self.migrate_full_access()?;
        self.migrate_domains()?;
        Ok(Outcome::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::logger::Level;
    use crate::steps::testing::harness;

    #[test]
    fn ipv4_prefixes_are_padded() {
        assert_eq!(to_network("128.141.").as_deref(), Some("128.141.0.0/16"));
        assert_eq!(to_network("10.").as_deref(), Some("10.0.0.0/8"));
        assert_eq!(to_network("192.168.1.7").as_deref(), Some("192.168.1.7/32"));
    }

    #[test]
    fn ipv6_prefixes_are_padded() {
        assert_eq!(to_network("2001:db8:").as_deref(), Some("2001:db8::/32"));
        assert_eq!(to_network("fe80::1").as_deref(), Some("fe80::1/128"));
    }

    #[test]
    fn invalid_masks_are_rejected() {
        for mask in ["", "cern.ch", "300.1.", "1.2.3.4.5", "1..2", "12345:"] {
            assert_eq!(to_network(mask), None, "{}", mask);
        }
    }

    #[test]
    fn domains_become_network_groups() {
        let h = harness(serde_json::json!({
            "root": {
                "MaKaCInfo": {"$ref": "0x1"},
                "domains": {"CERN": {"$ref": "0x2"}, "Nowhere": {"$ref": "0x3"}}
            },
            "objects": {
                "0x1": {"class": "MaKaC.common.info.MaKaCInfo", "state": {
                    "_title": "Indico", "_timezone": "Europe/Zurich",
                    "_ip_based_acl": ["137.138.", "bogus"]
                }},
                "0x2": {"class": "MaKaC.domain.Domain", "state": {
                    "name": "CERN", "description": "Site", "filterList": ["128.141.", "137.138."]
                }},
                "0x3": {"class": "MaKaC.domain.Domain", "state": {"name": "Nowhere", "filterList": ["x"]}}
            }
        }));
        h.run("global_pre_events").unwrap();

        assert_eq!(h.count("SELECT COUNT(*) FROM ip_network_groups"), 3);
        assert_eq!(
            h.count("SELECT COUNT(*) FROM ip_network_groups WHERE hidden = 1 AND attachment_access_override = 1"),
            1
        );
        assert_eq!(h.count("SELECT COUNT(*) FROM ip_networks"), 3);
        assert!(h.log.contains(Level::Warning, "Domain has no valid IPs: Nowhere"));
        assert!(h.log.contains(Level::Warning, "Skipped invalid mask 'bogus'"));

        let ns = h.ctx.global.borrow();
        assert!(ns.lookup_entity(global::IP_DOMAINS, &NsValue::from("cern")).unwrap().is_some());
        drop(ns);
        assert_eq!(
            h.ctx.dest.setting("core", "timezone").unwrap().as_deref(),
            Some("\"Europe/Zurich\"")
        );
    }
}
