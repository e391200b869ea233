//! Static safety checks for generated Python code.
//!
//! The code is parsed with a real Python grammar and walked node by node.
//! Imports must fall under the [`AllowList`]; calls to forbidden names or
//! `module.function` paths are rejected. Every violation is collected, not
//! only the first one.
//!
//! Attribute calls are resolved one level deep on plain names only, so
//! `import os as o; o.system(...)` passes. Process isolation in
//! [`crate::sandbox`] is the actual safety boundary.

mod policy;
mod visitor;

use std::fmt;

use rustpython_ast::Visitor;
use rustpython_parser::{ast, Parse};
use serde::Serialize;
use tracing::debug;

use crate::error::{CodereelError, Result};

pub use policy::AllowList;
pub(crate) use visitor::callee_path;
use visitor::SafetyVisitor;

const SOURCE_PATH: &str = "<generated>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    Import,
    RelativeImport,
    Call,
}

/// A single policy rejection, pointing at the offending name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub name: String,
    pub line: usize,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ViolationKind::Import => {
                write!(f, "disallowed import '{}' (line {})", self.name, self.line)
            }
            ViolationKind::RelativeImport => {
                write!(f, "relative import '{}' (line {})", self.name, self.line)
            }
            ViolationKind::Call => {
                write!(f, "forbidden call '{}' (line {})", self.name, self.line)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ValidationResult {
    SyntaxError { message: String },
    SafetyViolation { violations: Vec<Violation> },
    Valid,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    /// Convert a rejection into the error that aborts a job.
    pub fn into_result(self) -> Result<()> {
        match self {
            Self::Valid => Ok(()),
            Self::SyntaxError { message } => Err(CodereelError::InvalidCode { message }),
            Self::SafetyViolation { violations } => Err(CodereelError::UnsafeCode {
                violations: violations.iter().map(ToString::to_string).collect(),
            }),
        }
    }
}

/// Validate generated code: syntax first, then the safety walk.
pub fn validate(code: &str, policy: &AllowList) -> ValidationResult {
    let suite = match ast::Suite::parse(code, SOURCE_PATH) {
        Ok(suite) => suite,
        Err(e) => {
            debug!(error = %e, "Generated code failed to parse");
            return ValidationResult::SyntaxError {
                message: e.to_string(),
            };
        }
    };

    let mut visitor = SafetyVisitor::new(policy, code);
    for stmt in suite {
        visitor.visit_stmt(stmt);
    }

    let violations = visitor.into_violations();
    if violations.is_empty() {
        ValidationResult::Valid
    } else {
        debug!(count = violations.len(), "Generated code rejected by policy");
        ValidationResult::SafetyViolation { violations }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn violations(code: &str) -> Vec<Violation> {
        match validate(code, &AllowList::default()) {
            ValidationResult::SafetyViolation { violations } => violations,
            other => panic!("expected safety violation, got {:?}", other),
        }
    }

    #[test]
    fn test_valid_plotting_code() {
        let code = r#"
import math
import numpy as np
import matplotlib.pyplot as plt
from matplotlib import animation

x = np.linspace(0, 2 * math.pi, 200)
plt.plot(x, np.sin(x))
plt.show()
"#;
        assert_eq!(validate(code, &AllowList::default()), ValidationResult::Valid);
    }

    #[test]
    fn test_syntax_error_skips_safety_rules() {
        // Would also be a safety violation if it parsed.
        let code = "import socket\ndef broken(:\n    eval('1')\n";
        match validate(code, &AllowList::default()) {
            ValidationResult::SyntaxError { message } => assert!(!message.is_empty()),
            other => panic!("expected syntax error, got {:?}", other),
        }
    }

    #[test]
    fn test_disallowed_import_is_named() {
        let found = violations("import socket\n");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, ViolationKind::Import);
        assert_eq!(found[0].name, "socket");
        assert!(found[0].to_string().contains("socket"));
    }

    #[test]
    fn test_from_import_checked() {
        let found = violations("from urllib.request import urlopen\n");
        assert_eq!(found[0].name, "urllib.request");
    }

    #[test]
    fn test_relative_import_rejected() {
        let found = violations("from . import helpers\n");
        assert_eq!(found[0].kind, ViolationKind::RelativeImport);
        assert_eq!(found[0].name, ".");
    }

    #[test]
    fn test_forbidden_bare_and_dotted_calls() {
        let found = violations("import os\nos.system('ls')\n");
        // `os` is not allow-listed either.
        let names: Vec<_> = found.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["os", "os.system"]);
        assert_eq!(found[1].kind, ViolationKind::Call);
        assert_eq!(found[1].line, 2);

        let found = violations("x = eval('1 + 1')\n");
        assert_eq!(found[0].name, "eval");
    }

    #[test]
    fn test_all_violations_reported() {
        let code = r#"
import socket
import random

def sneaky():
    data = open('/etc/passwd').read()
    return exec(data)

print(eval("2"), __import__("os"))
"#;
        let found = violations(code);
        let names: Vec<_> = found.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["socket", "open", "exec", "eval", "__import__"]);
    }

    #[test]
    fn test_nested_calls_are_walked() {
        let found = violations("print(len(str(eval('3'))))\n");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "eval");
    }

    #[test]
    fn test_calls_in_with_items() {
        for code in [
            "with open('x') as fh:\n    pass\n",
            "def g():\n    with open('x'):\n        pass\n",
            "async def g():\n    async with open('x') as fh:\n        pass\n",
        ] {
            let found = violations(code);
            assert_eq!(found.len(), 1, "{code}");
            assert_eq!(found[0].name, "open");
        }
    }

    #[test]
    fn test_calls_in_signatures() {
        let cases = [
            ("def f(x=eval('1')):\n    pass\n", "eval"),
            ("def f(a, /, b=open('x')):\n    pass\n", "open"),
            ("def f(*, k=open('x')):\n    pass\n", "open"),
            ("def f(a: eval('int')):\n    pass\n", "eval"),
            ("def f(*args: eval('int'), **kw: exec('x')):\n    pass\n", "eval"),
            ("f = lambda x=compile('1', 'f', 'eval'): x\n", "compile"),
        ];
        for (code, name) in cases {
            let found = violations(code);
            assert_eq!(found[0].name, name, "{code}");
        }
    }

    #[test]
    fn test_calls_in_keywords() {
        let found = violations("class A(metaclass=eval('type')):\n    pass\n");
        assert_eq!(found[0].name, "eval");

        let found = violations("print(1, sep=eval('x'))\n");
        assert_eq!(found[0].name, "eval");
    }

    #[test]
    fn test_calls_in_match_cases() {
        let found = violations("match 1:\n    case 1:\n        eval('1')\n");
        assert_eq!(found[0].name, "eval");
        assert_eq!(found[0].line, 3);

        let found = violations("match 1:\n    case x if open('y'):\n        pass\n");
        assert_eq!(found[0].name, "open");
    }

    #[test]
    fn test_calls_in_comprehensions() {
        let found = violations("rows = [l for l in open('x') if eval(l)]\n");
        let names: Vec<_> = found.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["open", "eval"]);
    }

    #[test]
    fn test_method_named_like_forbidden_function_is_allowed() {
        let code = "import random\nclass Door:\n    def open(self):\n        pass\nDoor().open()\n";
        assert!(validate(code, &AllowList::default()).is_valid());
    }

    #[test]
    fn test_aliased_receiver_is_not_detected() {
        // Known static-analysis limitation: only literal receivers resolve.
        let policy = AllowList::new(["os"], ["os.system"]);
        assert!(validate("import os as o\no.system('ls')\n", &policy).is_valid());
        assert!(!validate("import os\nos.system('ls')\n", &policy).is_valid());
    }

    #[test]
    fn test_into_result() {
        assert!(ValidationResult::Valid.into_result().is_ok());

        let err = validate("import socket\n", &AllowList::default())
            .into_result()
            .unwrap_err();
        assert!(matches!(err, CodereelError::UnsafeCode { .. }));
        assert!(err.to_string().contains("socket"));

        let err = validate("def (", &AllowList::default())
            .into_result()
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_result_serializes_with_status_tag() {
        let json = serde_json::to_value(validate("import socket\n", &AllowList::default()))
            .unwrap();
        assert_eq!(json["status"], "safety_violation");
        assert_eq!(json["violations"][0]["name"], "socket");
        assert_eq!(json["violations"][0]["kind"], "import");
    }
}
