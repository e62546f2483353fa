//! Site topology from `getCurrentTopology`
//!
//! Layout attributes vary between Transis releases, so they are kept as
//! ordered key/value pairs rather than fixed structs. Exports flatten one
//! component across all sites into CSV.

use csv::{QuoteStyle, WriterBuilder};
use std::fmt;

use super::parser::XmlElement;
use crate::error::{IngestError, Result};

/// Site id attribute as it appears on `SiteLayout`
const SITE_ID: &str = "sId";

/// One layout element (arm, detector, street or signal group)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayoutElement {
    pub attributes: Vec<(String, String)>,
}

impl LayoutElement {
    fn from_element(element: &XmlElement) -> Self {
        Self {
            attributes: element.attributes.clone(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// A phase and the signal groups it drives
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Phase {
    pub name: String,
    pub signal_groups: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SiteLayout {
    pub attributes: Vec<(String, String)>,
    pub arms: Vec<LayoutElement>,
    pub detectors: Vec<LayoutElement>,
    pub streets: Vec<LayoutElement>,
    pub signal_groups: Vec<LayoutElement>,
    pub phases: Vec<Phase>,
}

impl SiteLayout {
    fn from_element(site: &XmlElement) -> Self {
        let elements = |container: &str| -> Vec<LayoutElement> {
            site.child(container)
                .map(|c| c.children.iter().map(LayoutElement::from_element).collect())
                .unwrap_or_default()
        };

        let phases = site
            .child("Phases")
            .map(|phases| {
                phases
                    .children
                    .iter()
                    .map(|phase| Phase {
                        name: phase.attr("name").unwrap_or_default().to_string(),
                        signal_groups: phase
                            .child("SGNos")
                            .map(|nos| nos.children.iter().map(|n| n.text.trim().to_string()).collect())
                            .unwrap_or_default(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            attributes: site.attributes.clone(),
            arms: elements("Arms"),
            detectors: elements("Detectors"),
            streets: elements("Streets"),
            signal_groups: elements("SGs"),
            phases,
        }
    }

    pub fn site_id(&self) -> &str {
        self.attributes
            .iter()
            .find(|(k, _)| k == SITE_ID)
            .map(|(_, v)| v.as_str())
            .unwrap_or_default()
    }

    fn component(&self, component: LayoutComponent) -> &[LayoutElement] {
        match component {
            LayoutComponent::Arms => &self.arms,
            LayoutComponent::Detectors => &self.detectors,
            LayoutComponent::Streets => &self.streets,
            LayoutComponent::Sgs => &self.signal_groups,
            LayoutComponent::Sites | LayoutComponent::Phases => &[],
        }
    }
}

/// Which part of the topology to export
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LayoutComponent {
    Sites,
    Arms,
    Detectors,
    Streets,
    Sgs,
    Phases,
}

impl fmt::Display for LayoutComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sites => "sites",
            Self::Arms => "arms",
            Self::Detectors => "detectors",
            Self::Streets => "streets",
            Self::Sgs => "sgs",
            Self::Phases => "phases",
        };
        f.write_str(name)
    }
}

/// All sites in a topology document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SiteLayouts {
    pub sites: Vec<SiteLayout>,
}

impl SiteLayouts {
    pub fn from_element(container: &XmlElement) -> Self {
        Self {
            sites: container.children.iter().map(SiteLayout::from_element).collect(),
        }
    }

    /// Flatten one component into CSV, every field quoted
    ///
    /// Columns come from the attributes of the first element found; sub-site
    /// components are prefixed with the owning site's `sId`.
    pub fn to_csv(&self, component: LayoutComponent) -> Result<String> {
        let mut writer = WriterBuilder::new()
            .quote_style(QuoteStyle::Always)
            .from_writer(Vec::new());

        match component {
            LayoutComponent::Sites => {
                let first = self
                    .sites
                    .first()
                    .ok_or_else(|| nothing_to_export(component))?;
                let headers: Vec<&str> = first.attributes.iter().map(|(k, _)| k.as_str()).collect();
                write_row(&mut writer, headers.iter().copied())?;
                for site in &self.sites {
                    write_row(&mut writer, headers.iter().map(|h| lookup(&site.attributes, h)))?;
                }
            },
            LayoutComponent::Phases => {
                if self.sites.iter().all(|s| s.phases.is_empty()) {
                    return Err(nothing_to_export(component));
                }
                write_row(&mut writer, [SITE_ID, "name", "sgno"])?;
                for site in &self.sites {
                    for phase in &site.phases {
                        for sg in &phase.signal_groups {
                            write_row(&mut writer, [site.site_id(), phase.name.as_str(), sg.as_str()])?;
                        }
                    }
                }
            },
            _ => {
                let first = self
                    .sites
                    .iter()
                    .find_map(|s| s.component(component).first())
                    .ok_or_else(|| nothing_to_export(component))?;
                let keys: Vec<&str> = first.attributes.iter().map(|(k, _)| k.as_str()).collect();
                write_row(&mut writer, std::iter::once(SITE_ID).chain(keys.iter().copied()))?;
                for site in &self.sites {
                    for element in site.component(component) {
                        let values = keys.iter().map(|k| element.get(k).unwrap_or_default());
                        write_row(&mut writer, std::iter::once(site.site_id()).chain(values))?;
                    }
                }
            },
        }

        let bytes = writer
            .into_inner()
            .map_err(|e| IngestError::Export(e.to_string()))?;
        String::from_utf8(bytes).map_err(|e| IngestError::Export(e.to_string()))
    }
}

fn lookup<'a>(attributes: &'a [(String, String)], key: &str) -> &'a str {
    attributes
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
        .unwrap_or_default()
}

fn write_row<'a, W: std::io::Write>(
    writer: &mut csv::Writer<W>,
    fields: impl IntoIterator<Item = &'a str>,
) -> Result<()> {
    writer
        .write_record(fields)
        .map_err(|e| IngestError::Export(e.to_string()))
}

fn nothing_to_export(component: LayoutComponent) -> IngestError {
    IngestError::Export(format!("topology contains no {component}"))
}
