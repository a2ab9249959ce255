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

use std::borrow::Cow;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};

use lazy_static::lazy_static;
use tf_provider::{
    Attribute, AttributeConstraint, AttributePath, AttributeType, Description, Diagnostics,
    Schema, Value, ValueMap, ValueSet, ValueString,
};

pub(crate) trait WithSchema {
    fn schema() -> Schema;
}

pub(crate) trait WithValidate {
    fn validate(&self, diags: &mut Diagnostics, attr_path: AttributePath);
}

impl<T: WithValidate> WithValidate for Value<T> {
    fn validate(&self, diags: &mut Diagnostics, attr_path: AttributePath) {
        if let Value::Value(value) = self {
            value.validate(diags, attr_path);
        }
    }
}

pub(crate) fn attribute(
    attr_type: AttributeType,
    constraint: AttributeConstraint,
    description: &str,
) -> Attribute {
    Attribute {
        attr_type,
        description: Description::plain(description),
        constraint,
        ..Default::default()
    }
}

lazy_static! {
    pub(crate) static ref ID_ATTRIBUTE: Attribute = attribute(
        AttributeType::String,
        AttributeConstraint::Computed,
        "Identifier of the remote object",
    );
}

/// Computed attributes the practitioner left out are only known after apply
pub(crate) fn unknown_if_null<T>(value: &mut Value<T>) {
    if value.is_null() {
        *value = Value::Unknown;
    }
}

/// Remote strings, where empty means absent
pub(crate) fn string_or_null<'a>(value: Option<String>) -> ValueString<'a> {
    match value {
        Some(value) if !value.is_empty() => Value::Value(Cow::Owned(value)),
        _ => Value::Null,
    }
}

pub(crate) fn known_string(value: &ValueString) -> Option<String> {
    value.as_deref_option().map(str::to_owned)
}

pub(crate) fn known_strings<'v, 'a: 'v, I>(values: I) -> Vec<String>
where
    I: IntoIterator<Item = &'v ValueString<'a>>,
{
    values
        .into_iter()
        .filter_map(|value| value.as_deref_option())
        .map(str::to_owned)
        .collect()
}

pub(crate) fn string_set<'a, I>(values: I) -> ValueSet<ValueString<'a>>
where
    I: IntoIterator<Item = String>,
{
    Value::Value(
        values
            .into_iter()
            .map(|value| Value::Value(Cow::Owned(value)))
            .collect::<BTreeSet<_>>(),
    )
}

pub(crate) fn known_map(value: &ValueMap<ValueString>) -> BTreeMap<String, String> {
    value
        .iter()
        .flatten()
        .filter_map(|(key, value)| Some((key.to_string(), value.as_deref_option()?.to_owned())))
        .collect()
}

/// Remote map restricted to the keys already tracked in the state
///
/// Keys added by the cloud itself are dropped. A null prior stays null.
pub(crate) fn tracked_map<'a>(
    values: BTreeMap<String, String>,
    prior: &ValueMap<ValueString>,
) -> ValueMap<'a, ValueString<'a>> {
    let Value::Value(prior) = prior else {
        return Value::Null;
    };
    Value::Value(
        values
            .into_iter()
            .filter(|(key, _)| prior.contains_key(key.as_str()))
            .map(|(key, value)| (Cow::Owned(key), Value::Value(Cow::Owned(value))))
            .collect(),
    )
}

/// Record a replacement trigger when a ForceNew attribute changes
pub(crate) fn force_new<T: PartialEq>(
    replace: &mut Vec<AttributePath>,
    name: &'static str,
    prior: &T,
    planned: &T,
) {
    if prior != planned {
        replace.push(AttributePath::new(name));
    }
}

/// Check that a known number lies within bounds
pub(crate) fn validate_range(
    diags: &mut Diagnostics,
    name: &'static str,
    value: &Value<i64>,
    min: i64,
    max: i64,
) {
    if let Value::Value(value) = value {
        if *value < min || *value > max {
            diags.error(
                format!("`{name}` is out of range"),
                format!("`{name}` must be between {min} and {max}, got {value}"),
                AttributePath::new(name),
            );
        }
    }
}

/// Check that a known string is one of the accepted values
pub(crate) fn validate_one_of(
    diags: &mut Diagnostics,
    name: &'static str,
    value: &ValueString,
    accepted: &[&str],
) {
    if let Some(value) = value.as_deref_option() {
        if !accepted.contains(&value) {
            diags.error(
                format!("Invalid value for `{name}`"),
                format!(
                    "`{value}` is not one of: {}",
                    accepted.iter().join_with(", ")
                ),
                AttributePath::new(name),
            );
        }
    }
}

pub struct DisplayJoiner<'a, T, I>
where
    T: Iterator<Item = I>,
    I: std::fmt::Display,
{
    iter: RefCell<T>,
    sep: &'a str,
}

pub trait DisplayJoinable {
    type Joiner<'a>;
    fn join_with(self, sep: &str) -> Self::Joiner<'_>;
}

impl<T, I> DisplayJoinable for T
where
    T: Iterator<Item = I>,
    I: std::fmt::Display,
{
    type Joiner<'a> = DisplayJoiner<'a, T, I>;

    fn join_with(self, sep: &str) -> Self::Joiner<'_> {
        DisplayJoiner {
            iter: RefCell::new(self),
            sep,
        }
    }
}

impl<'a, T, I> std::fmt::Display for DisplayJoiner<'a, T, I>
where
    T: Iterator<Item = I>,
    I: std::fmt::Display,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut sep = "";
        let mut iter = self.iter.try_borrow_mut().or(Err(std::fmt::Error))?;
        for elt in iter.by_ref() {
            f.write_str(sep)?;
            f.write_fmt(format_args!("{elt}"))?;
            sep = self.sep;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_with_separator() {
        assert_eq!(["a", "b", "c"].iter().join_with(", ").to_string(), "a, b, c");
        assert_eq!(Vec::<u8>::new().iter().join_with(", ").to_string(), "");
    }

    #[test]
    fn null_becomes_unknown() {
        let mut value: Value<i64> = Value::Null;
        unknown_if_null(&mut value);
        assert!(value.is_unknown());

        let mut value = Value::Value(3);
        unknown_if_null(&mut value);
        assert_eq!(value, Value::Value(3));
    }

    #[test]
    fn empty_remote_strings_are_null() {
        assert!(string_or_null(Some(String::new())).is_null());
        assert!(string_or_null(None).is_null());
        assert_eq!(string_or_null(Some("x".to_owned())).as_str(), "x");
    }

    #[test]
    fn string_sets_skip_unknowns() {
        let set = string_set(["b".to_owned(), "a".to_owned()]);
        assert_eq!(known_strings(set.iter().flatten()), ["a", "b"]);
        let values = [Value::from("x"), Value::Unknown, Value::Null];
        assert_eq!(known_strings(&values), ["x"]);
    }

    #[test]
    fn remote_maps_keep_tracked_keys() {
        let remote: BTreeMap<String, String> = [
            ("role".to_owned(), "web".to_owned()),
            ("metering.image_id".to_owned(), "img".to_owned()),
            ("os_type".to_owned(), "Linux".to_owned()),
        ]
        .into();

        let prior: ValueMap<ValueString> = Value::Null;
        assert!(tracked_map(remote.clone(), &prior).is_null());

        let prior: ValueMap<ValueString> = Value::Value(
            [(Cow::Borrowed("role"), Value::from("db")), (Cow::Borrowed("gone"), Value::from("x"))]
                .into_iter()
                .collect(),
        );
        let map = known_map(&tracked_map(remote, &prior));
        assert_eq!(map.len(), 1);
        assert_eq!(map["role"], "web");
    }

    #[test]
    fn range_and_enum_checks() {
        let mut diags = Diagnostics::default();
        validate_range(&mut diags, "pending_days", &Value::Value(5), 7, 1096);
        validate_range(&mut diags, "pending_days", &Value::Unknown, 7, 1096);
        validate_one_of(&mut diags, "queue_mode", &Value::from("FIFO"), &["NORMAL", "FIFO"]);
        validate_one_of(&mut diags, "queue_mode", &Value::from("LIFO"), &["NORMAL", "FIFO"]);
        assert_eq!(diags.errors.len(), 2);
    }
}
