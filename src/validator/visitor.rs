use rustpython_ast::{self as ast, Visitor};

use crate::validator::policy::AllowList;
use crate::validator::{Violation, ViolationKind};

/// Walks a parsed module and records every import and call the policy rejects.
pub(crate) struct SafetyVisitor<'a> {
    policy: &'a AllowList,
    source: &'a str,
    violations: Vec<Violation>,
}

impl<'a> SafetyVisitor<'a> {
    pub(crate) fn new(policy: &'a AllowList, source: &'a str) -> Self {
        Self {
            policy,
            source,
            violations: Vec::new(),
        }
    }

    pub(crate) fn into_violations(self) -> Vec<Violation> {
        self.violations
    }

    fn record(&mut self, kind: ViolationKind, name: String, offset: u32) {
        let line = line_at(self.source, offset as usize);
        self.violations.push(Violation { kind, name, line });
    }
}

impl Visitor for SafetyVisitor<'_> {
    fn visit_stmt_import(&mut self, node: ast::StmtImport) {
        let offset = u32::from(node.range.start());
        for alias in &node.names {
            let module = alias.name.as_str();
            if !self.policy.permits_import(module) {
                self.record(ViolationKind::Import, module.to_string(), offset);
            }
        }
    }

    fn visit_stmt_import_from(&mut self, node: ast::StmtImportFrom) {
        let offset = u32::from(node.range.start());
        let level = node.level.map(|l| l.to_u32()).unwrap_or(0);
        let module = node.module.as_ref().map(|m| m.as_str()).unwrap_or("");

        if level > 0 {
            let name = format!("{}{}", ".".repeat(level as usize), module);
            self.record(ViolationKind::RelativeImport, name, offset);
        } else if !self.policy.permits_import(module) {
            self.record(ViolationKind::Import, module.to_string(), offset);
        }
    }

    fn visit_expr_call(&mut self, node: ast::ExprCall) {
        if let Some(callee) = callee_path(&node.func) {
            if self.policy.forbids_call(&callee) {
                self.record(ViolationKind::Call, callee, u32::from(node.range.start()));
            }
        }
        // Arguments and nested calls still need checking.
        self.generic_visit_expr_call(node);
    }

    // The generated visitor stops at the nodes below; descend by hand so
    // calls in defaults, annotations, keywords, `with` items, comprehension
    // clauses and match guards are seen.

    fn visit_arguments(&mut self, node: ast::Arguments) {
        let ast::Arguments {
            posonlyargs,
            args,
            vararg,
            kwonlyargs,
            kwarg,
            ..
        } = node;
        for arg in posonlyargs.into_iter().chain(args).chain(kwonlyargs) {
            self.visit_arg(arg.def);
            if let Some(default) = arg.default {
                self.visit_expr(*default);
            }
        }
        for arg in vararg.into_iter().chain(kwarg) {
            self.visit_arg(*arg);
        }
    }

    fn visit_arg(&mut self, node: ast::Arg) {
        if let Some(annotation) = node.annotation {
            self.visit_expr(*annotation);
        }
    }

    fn visit_keyword(&mut self, node: ast::Keyword) {
        self.visit_expr(node.value);
    }

    fn visit_withitem(&mut self, node: ast::WithItem) {
        self.visit_expr(node.context_expr);
        if let Some(vars) = node.optional_vars {
            self.visit_expr(*vars);
        }
    }

    fn visit_comprehension(&mut self, node: ast::Comprehension) {
        self.visit_expr(node.target);
        self.visit_expr(node.iter);
        for cond in node.ifs {
            self.visit_expr(cond);
        }
    }

    fn visit_match_case(&mut self, node: ast::MatchCase) {
        self.visit_pattern(node.pattern);
        if let Some(guard) = node.guard {
            self.visit_expr(*guard);
        }
        for stmt in node.body {
            self.visit_stmt(stmt);
        }
    }
}

/// `eval` for a bare name, `os.system` for an attribute on a plain name.
///
/// Deeper chains (`a.b.c()`) and computed receivers yield `None`.
pub(crate) fn callee_path(func: &ast::Expr) -> Option<String> {
    match func {
        ast::Expr::Name(name) => Some(name.id.as_str().to_string()),
        ast::Expr::Attribute(attr) => match attr.value.as_ref() {
            ast::Expr::Name(receiver) => Some(format!(
                "{}.{}",
                receiver.id.as_str(),
                attr.attr.as_str()
            )),
            _ => None,
        },
        _ => None,
    }
}

/// 1-based line containing byte `offset`.
fn line_at(source: &str, offset: usize) -> usize {
    let end = offset.min(source.len());
    source.as_bytes()[..end].iter().filter(|&&b| b == b'\n').count() + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_at() {
        let src = "a\nbb\nccc";
        assert_eq!(line_at(src, 0), 1);
        assert_eq!(line_at(src, 2), 2);
        assert_eq!(line_at(src, 5), 3);
        assert_eq!(line_at(src, 100), 3);
    }
}
