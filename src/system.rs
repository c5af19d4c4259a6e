//! Links and axes built from configuration.
//!
//! [`MdriveSystem`] owns one [`MdriveLink`] per configured link and one
//! [`MdriveAxis`] per configured axis. Links are opened before any axis is
//! initialized; a link that cannot be opened aborts the build.

use crate::config::MdriveConfig;
use anyhow::{Context, Result};
use futures::future::join_all;
use mdrive_core::serial::DynSerial;
use mdrive_driver_schneider::{MdriveAxis, MdriveLink};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Every configured link and axis, addressable by id.
#[derive(Debug)]
pub struct MdriveSystem {
    links: BTreeMap<String, Arc<MdriveLink>>,
    axes: BTreeMap<String, Arc<MdriveAxis>>,
}

impl MdriveSystem {
    /// Open every link on its serial port and initialize every axis.
    ///
    /// # Errors
    /// Fails on invalid configuration, on a link that cannot be opened and on
    /// an axis whose link cannot be acquired.
    pub async fn from_config(config: &MdriveConfig) -> Result<Self> {
        Self::from_config_with_ports(config, HashMap::new()).await
    }

    /// Like [`from_config`](Self::from_config), but links whose id is in
    /// `ports` run over the given byte stream instead of opening a serial port.
    pub async fn from_config_with_ports(
        config: &MdriveConfig,
        mut ports: HashMap<String, DynSerial>,
    ) -> Result<Self> {
        config.validate()?;

        let mut links = BTreeMap::new();
        for link_cfg in &config.links {
            let link = Arc::new(MdriveLink::new(link_cfg.serial_settings()));
            let opened = match ports.remove(&link_cfg.id) {
                Some(port) => link.open_with(port).await,
                None => link.open().await,
            };
            opened.with_context(|| format!("failed to open link '{}'", link_cfg.id))?;
            links.insert(link_cfg.id.clone(), link);
        }

        let mut axes = BTreeMap::new();
        for axis_cfg in &config.axes {
            let link = links
                .get(&axis_cfg.link)
                .with_context(|| format!("axis '{}': no link '{}'", axis_cfg.id, axis_cfg.link))?;
            let axis = MdriveAxis::new(Arc::clone(link), axis_cfg.axis_settings());
            axis.initialize()
                .await
                .with_context(|| format!("failed to initialize axis '{}'", axis_cfg.id))?;
            if let Some(factor) = axis_cfg.conversion {
                axis.set_conversion(factor)?;
            }
            if let Some(unit) = axis_cfg.unit {
                axis.set_movement_unit(unit.as_str());
            }
            tracing::info!(
                axis = %axis_cfg.id,
                link = %axis_cfg.link,
                state = %axis.state(),
                "axis ready"
            );
            axes.insert(axis_cfg.id.clone(), Arc::new(axis));
        }

        Ok(Self { links, axes })
    }

    /// Link by id.
    pub fn link(&self, id: &str) -> Option<&Arc<MdriveLink>> {
        self.links.get(id)
    }

    /// Axis by id.
    pub fn axis(&self, id: &str) -> Option<&Arc<MdriveAxis>> {
        self.axes.get(id)
    }

    /// All axes, ordered by id.
    pub fn axes(&self) -> impl Iterator<Item = (&str, &Arc<MdriveAxis>)> {
        self.axes.iter().map(|(id, axis)| (id.as_str(), axis))
    }

    /// All links, ordered by id.
    pub fn links(&self) -> impl Iterator<Item = (&str, &Arc<MdriveLink>)> {
        self.links.iter().map(|(id, link)| (id.as_str(), link))
    }

    /// Turn every axis off, then close every link.
    pub async fn shutdown(&self) {
        for axis in self.axes.values() {
            axis.shutdown();
        }
        join_all(self.links.values().map(|link| link.close())).await;
        tracing::info!(links = self.links.len(), axes = self.axes.len(), "shut down");
    }
}
