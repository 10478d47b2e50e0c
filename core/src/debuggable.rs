//! Named state snapshots for debug views and run reports.

use std::borrow::Cow;
use std::fmt;

use crate::time::EmuTime;

#[macro_export]
macro_rules! dbgprop_bool {
    ($name:expr, $val:expr) => {
        DebuggableProperty::new($name, DebuggablePropertyValue::Boolean($val))
    };
}

#[macro_export]
macro_rules! dbgprop_udec {
    ($name:expr, $val:expr) => {
        DebuggableProperty::new($name, DebuggablePropertyValue::UnsignedDecimal(($val).try_into().unwrap()))
    };
}

#[macro_export]
macro_rules! dbgprop_time {
    ($name:expr, $val:expr) => {
        DebuggableProperty::new($name, DebuggablePropertyValue::Time($val))
    };
}

#[macro_export]
macro_rules! dbgprop_nest {
    ($name:expr, $val:expr) => {
        DebuggableProperty::new(
            $name,
            DebuggablePropertyValue::Nested($val.get_debug_properties()),
        )
    };
}

pub type DebuggableProperties = Vec<DebuggableProperty>;

pub struct DebuggableProperty {
    name: Cow<'static, str>,
    value: DebuggablePropertyValue,
}

impl DebuggableProperty {
    pub fn new(name: impl Into<Cow<'static, str>>, value: DebuggablePropertyValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &DebuggablePropertyValue {
        &self.value
    }
}

pub enum DebuggablePropertyValue {
    Nested(DebuggableProperties),
    Boolean(bool),
    UnsignedDecimal(u64),
    Time(EmuTime),
}

impl fmt::Display for DebuggablePropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nested(props) => write!(f, "({} properties)", props.len()),
            Self::Boolean(v) => write!(f, "{}", if *v { "yes" } else { "no" }),
            Self::UnsignedDecimal(v) => write!(f, "{}", v),
            Self::Time(t) => write!(f, "{}", t),
        }
    }
}

pub trait Debuggable {
    fn get_debug_properties(&self) -> DebuggableProperties;
}

/// Flattens nested properties into `("Outer / Inner", value)` pairs.
pub fn flatten_properties(props: &[DebuggableProperty]) -> Vec<(String, String)> {
    fn walk(prefix: &str, props: &[DebuggableProperty], out: &mut Vec<(String, String)>) {
        for p in props {
            let name = if prefix.is_empty() {
                p.name().to_string()
            } else {
                format!("{} / {}", prefix, p.name())
            };
            match p.value() {
                DebuggablePropertyValue::Nested(inner) => walk(&name, inner, out),
                v => out.push((name, v.to_string())),
            }
        }
    }

    let mut out = vec![];
    walk("", props, &mut out);
    out
}
