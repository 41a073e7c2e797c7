//! Policy statement model
//!
//! Statements use the policy tool's command syntax: whitespace-separated
//! keyword forms like `allow su * * *` or `permissive su`. `*` is passed
//! through verbatim; wildcard expansion is the toolkit's concern, not ours.

use std::fmt;

use crate::error::{Error, Result};

/// A single policy mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// Grant `source` access to `target` for one class/permission pair
    Allow {
        source: String,
        target: String,
        class: String,
        perm: String,
    },
    /// Declare a new domain type
    Create { name: String },
    /// Put a domain into permissive mode
    Permissive { name: String },
    /// Add an attribute to a type
    AttrAdd { name: String, attr: String },
    /// Type transition: `source` executing/creating in `target` context of
    /// `class` lands in `default`
    TypeTrans {
        source: String,
        target: String,
        class: String,
        default: String,
    },
}

impl Statement {
    /// Parse one statement in command syntax.
    pub fn parse(raw: &str) -> Result<Statement> {
        let words: Vec<&str> = raw.split_whitespace().collect();
        let stmt = match words.as_slice() {
            ["allow", source, target, class, perm] => Statement::Allow {
                source: source.to_string(),
                target: target.to_string(),
                class: class.to_string(),
                perm: perm.to_string(),
            },
            ["create", name] => Statement::Create {
                name: name.to_string(),
            },
            ["permissive", name] => Statement::Permissive {
                name: name.to_string(),
            },
            ["attradd", name, attr] => Statement::AttrAdd {
                name: name.to_string(),
                attr: attr.to_string(),
            },
            ["typetrans", source, target, class, default] => Statement::TypeTrans {
                source: source.to_string(),
                target: target.to_string(),
                class: class.to_string(),
                default: default.to_string(),
            },
            _ => return Err(Error::Statement(raw.to_string())),
        };
        Ok(stmt)
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Allow {
                source,
                target,
                class,
                perm,
            } => write!(f, "allow {} {} {} {}", source, target, class, perm),
            Statement::Create { name } => write!(f, "create {}", name),
            Statement::Permissive { name } => write!(f, "permissive {}", name),
            Statement::AttrAdd { name, attr } => write!(f, "attradd {} {}", name, attr),
            Statement::TypeTrans {
                source,
                target,
                class,
                default,
            } => write!(f, "typetrans {} {} {} {}", source, target, class, default),
        }
    }
}

/// The fixed rule table applied to every resolved policy: declare the `su`
/// domain, make it permissive and trusted, and open the paths the companion
/// binary needs before its daemon can take over policy management.
pub fn magisk_rules() -> Vec<Statement> {
    fn allow(source: &str, target: &str, class: &str, perm: &str) -> Statement {
        Statement::Allow {
            source: source.to_string(),
            target: target.to_string(),
            class: class.to_string(),
            perm: perm.to_string(),
        }
    }
    vec![
        Statement::Create {
            name: "su".to_string(),
        },
        Statement::Permissive {
            name: "su".to_string(),
        },
        Statement::AttrAdd {
            name: "su".to_string(),
            attr: "mlstrustedsubject".to_string(),
        },
        allow("su", "*", "*", "*"),
        allow("*", "su", "process", "sigchld"),
        allow("init", "su", "process", "transition"),
        allow("init", "su", "process", "rlimitinh"),
        allow("init", "su", "process", "siginh"),
        allow("rootfs", "rootfs", "filesystem", "remount"),
        Statement::TypeTrans {
            source: "init".to_string(),
            target: "rootfs".to_string(),
            class: "process".to_string(),
            default: "su".to_string(),
        },
    ]
}
