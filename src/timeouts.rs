// This file is part of the terraform-provider-otc project
//
// Copyright (C) ANEO, 2024-2024. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License")
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::time::Duration;

use anyhow::{anyhow, Result};
use jiff::SignedDuration;
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use tf_provider::{
    map, Attribute, AttributeConstraint, AttributePath, AttributeType, Block, Description,
    Diagnostics, NestedBlock, Value, ValueString,
};

use crate::utils::WithValidate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Update,
    Delete,
}

/// `timeouts` block of long running resources
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Timeouts<'a> {
    #[serde(borrow = "'a")]
    pub create: ValueString<'a>,
    pub update: ValueString<'a>,
    pub delete: ValueString<'a>,
}

impl<'a> Timeouts<'a> {
    fn get(&self, operation: Operation) -> &ValueString<'a> {
        match operation {
            Operation::Create => &self.create,
            Operation::Update => &self.update,
            Operation::Delete => &self.delete,
        }
    }

    /// Timeout configured for an operation, `default` when absent or invalid
    pub fn pick(timeouts: &Value<Timeouts<'a>>, operation: Operation, default: Duration) -> Duration {
        timeouts
            .as_ref_option()
            .and_then(|timeouts| timeouts.get(operation).as_deref_option())
            .and_then(|value| parse_duration(value).ok())
            .unwrap_or(default)
    }
}

/// Parse durations such as `10m`, `1h30m` or `90s`
pub fn parse_duration(value: &str) -> Result<Duration> {
    let duration: SignedDuration = value
        .trim()
        .parse()
        .map_err(|err| anyhow!("invalid duration `{value}`: {err}"))?;
    Duration::try_from(duration).map_err(|_| anyhow!("duration `{value}` must not be negative"))
}

impl<'a> WithValidate for Timeouts<'a> {
    fn validate(&self, diags: &mut Diagnostics, attr_path: AttributePath) {
        for (name, value) in [
            ("create", &self.create),
            ("update", &self.update),
            ("delete", &self.delete),
        ] {
            if let Some(value) = value.as_deref_option() {
                if let Err(err) = parse_duration(value) {
                    diags.error(
                        "Invalid timeout",
                        err.to_string(),
                        attr_path.clone().attribute(name),
                    );
                }
            }
        }
    }
}

lazy_static! {
    pub static ref TIMEOUTS_BLOCK: NestedBlock = NestedBlock::Optional(Block {
        attributes: map! {
            "create" => Attribute {
                attr_type: AttributeType::String,
                description: Description::plain("Maximum duration of the creation (e.g. `10m`)"),
                constraint: AttributeConstraint::Optional,
                ..Default::default()
            },
            "update" => Attribute {
                attr_type: AttributeType::String,
                description: Description::plain("Maximum duration of an update"),
                constraint: AttributeConstraint::Optional,
                ..Default::default()
            },
            "delete" => Attribute {
                attr_type: AttributeType::String,
                description: Description::plain("Maximum duration of the deletion"),
                constraint: AttributeConstraint::Optional,
                ..Default::default()
            },
        },
        description: Description::plain("Operation timeouts"),
        ..Default::default()
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn friendly_durations() {
        assert_eq!(parse_duration("10m").unwrap(), Duration::from_secs(600));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration(" 45s ").unwrap(), Duration::from_secs(45));
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("-5m").is_err());
    }

    #[test]
    fn pick_falls_back_to_default() {
        let default = Duration::from_secs(60);
        let timeouts = Value::Value(Timeouts {
            create: Value::from("20m"),
            update: Value::from("never"),
            delete: Value::Null,
        });
        assert_eq!(
            Timeouts::pick(&timeouts, Operation::Create, default),
            Duration::from_secs(1200)
        );
        assert_eq!(Timeouts::pick(&timeouts, Operation::Update, default), default);
        assert_eq!(Timeouts::pick(&timeouts, Operation::Delete, default), default);
        assert_eq!(Timeouts::pick(&Value::Null, Operation::Create, default), default);
    }

    #[test]
    fn invalid_values_are_reported() {
        let timeouts = Timeouts {
            create: Value::from("10x"),
            update: Value::from("5m"),
            delete: Value::Unknown,
        };
        let mut diags = Diagnostics::default();
        timeouts.validate(&mut diags, AttributePath::new("timeouts").index(0));
        assert_eq!(diags.errors.len(), 1);
    }
}
