// Copyright 2022 The Strata Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The repository filter of a sparse clone.
//!
//! The filter is an INI file. Each section names a layer (the section
//! `default` applies to every layer); within a section, `bbox =
//! minx,miny,maxx,maxy` matches features whose envelope intersects the box,
//! and any other key matches features whose attribute of that name has
//! exactly that value. A feature passes the filter if any rule for its layer
//! matches.

use std::collections::BTreeMap;
use std::path::Path;

use thiserror::Error;

use crate::backend::{BoundingBox, Feature};

/// Section applying to all layers.
const DEFAULT_SECTION: &str = "default";

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("Cannot read filter file: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Invalid bounding box: {0}")]
    InvalidBbox(String),
}

#[derive(Debug, Clone, PartialEq)]
struct FilterRule {
    layer: String,
    bbox: Option<BoundingBox>,
    attributes: BTreeMap<String, String>,
}

impl FilterRule {
    fn matches(&self, feature: &Feature) -> bool {
        if let Some(rule_bbox) = &self.bbox {
            match &feature.bbox {
                Some(bbox) if rule_bbox.intersects(bbox) => {}
                _ => return false,
            }
        }
        for (name, expected) in &self.attributes {
            match feature.properties.get(name) {
                Some(value) if value.to_string() == *expected => {}
                _ => return false,
            }
        }
        true
    }
}

/// Predicate over feature paths and attributes, loaded from the file named
/// by the `sparse.filter` config key. A filter with no rules lets nothing
/// through.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RepositoryFilter {
    rules: Vec<FilterRule>,
}

impl RepositoryFilter {
    pub fn from_file(path: &Path) -> Result<Self, FilterError> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.to_owned()).format(config::FileFormat::Ini))
            .build()?;
        Self::from_config(config)
    }

    pub fn from_config(config: config::Config) -> Result<Self, FilterError> {
        let sections: BTreeMap<String, BTreeMap<String, String>> = config.try_deserialize()?;
        let mut rules = vec![];
        for (layer, keys) in sections {
            let mut bbox = None;
            let mut attributes = BTreeMap::new();
            for (key, value) in keys {
                if key == "bbox" {
                    bbox = Some(parse_bbox(&value)?);
                } else {
                    attributes.insert(key, value);
                }
            }
            rules.push(FilterRule {
                layer,
                bbox,
                attributes,
            });
        }
        Ok(RepositoryFilter { rules })
    }

    pub fn matches(&self, layer: &str, feature: &Feature) -> bool {
        self.rules
            .iter()
            .filter(|rule| rule.layer == layer || rule.layer == DEFAULT_SECTION)
            .any(|rule| rule.matches(feature))
    }
}

fn parse_bbox(value: &str) -> Result<BoundingBox, FilterError> {
    let parts = value
        .split(',')
        .map(|part| part.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| FilterError::InvalidBbox(value.to_string()))?;
    match parts[..] {
        [min_x, min_y, max_x, max_y] => Ok(BoundingBox::new(min_x, min_y, max_x, max_y)),
        _ => Err(FilterError::InvalidBbox(value.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use indoc::indoc;
    use maplit::btreemap;

    use super::*;
    use crate::backend::PropertyValue;

    fn filter_from(contents: &str) -> RepositoryFilter {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("filter.ini");
        fs::write(&path, contents).unwrap();
        RepositoryFilter::from_file(&path).unwrap()
    }

    fn feature_at(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Feature {
        Feature {
            bbox: Some(BoundingBox::new(min_x, min_y, max_x, max_y)),
            properties: BTreeMap::new(),
        }
    }

    #[test]
    fn test_bbox_rule() {
        let filter = filter_from(indoc! {"
            [roads]
            bbox = -10, -10, 10, 10
        "});
        assert!(filter.matches("roads", &feature_at(0.0, 0.0, 1.0, 1.0)));
        assert!(filter.matches("roads", &feature_at(9.0, 9.0, 20.0, 20.0)));
        assert!(!filter.matches("roads", &feature_at(11.0, 11.0, 20.0, 20.0)));
        // The rule is scoped to the roads layer
        assert!(!filter.matches("parks", &feature_at(0.0, 0.0, 1.0, 1.0)));
        // A feature without geometry cannot pass a bbox rule
        assert!(!filter.matches("roads", &Feature::default()));
    }

    #[test]
    fn test_attribute_rule() {
        let filter = filter_from(indoc! {"
            [roads]
            surface = paved
        "});
        let paved = Feature {
            bbox: None,
            properties: btreemap! {
                "surface".to_string() => PropertyValue::String("paved".to_string()),
            },
        };
        let gravel = Feature {
            bbox: None,
            properties: btreemap! {
                "surface".to_string() => PropertyValue::String("gravel".to_string()),
            },
        };
        assert!(filter.matches("roads", &paved));
        assert!(!filter.matches("roads", &gravel));
        assert!(!filter.matches("roads", &Feature::default()));
    }

    #[test]
    fn test_default_section_applies_to_all_layers() {
        let filter = filter_from(indoc! {"
            [default]
            bbox = 0, 0, 5, 5
        "});
        assert!(filter.matches("roads", &feature_at(1.0, 1.0, 2.0, 2.0)));
        assert!(filter.matches("parks", &feature_at(1.0, 1.0, 2.0, 2.0)));
        assert!(!filter.matches("parks", &feature_at(6.0, 6.0, 7.0, 7.0)));
    }

    #[test]
    fn test_empty_filter_matches_nothing() {
        let filter = RepositoryFilter::default();
        assert!(!filter.matches("roads", &feature_at(0.0, 0.0, 1.0, 1.0)));
    }

    #[test]
    fn test_invalid_bbox() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("filter.ini");
        fs::write(&path, "[roads]\nbbox = 1, 2, 3\n").unwrap();
        assert!(matches!(
            RepositoryFilter::from_file(&path),
            Err(FilterError::InvalidBbox(_))
        ));
    }
}
