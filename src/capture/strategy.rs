use std::path::Path;
use std::time::Duration;

use rustpython_ast::{self as ast, Visitor};
use rustpython_parser::Parse;
use tracing::debug;

use crate::capture::{GraphicsLibrary, GAME_TEARDOWN};
use crate::validator::callee_path;

/// Intermediate PostScript export of a turtle canvas, relative to the job dir.
const TURTLE_EPS: &str = "__codereel_canvas.eps";

/// Rewrite `code` so that running it leaves an image at `artifact_path`.
///
/// `artifact_path` is the path as seen by the interpreter, which differs from
/// the host path for container backends.
pub fn rewrite(
    library: GraphicsLibrary,
    code: &str,
    artifact_path: &Path,
    budget: Duration,
) -> String {
    let target = py_string_literal(&artifact_path.to_string_lossy());
    let sleep = format!("{:.3}", budget.as_secs_f64());

    match library {
        GraphicsLibrary::Plotting => append(
            code,
            &format!(
                "import time as __codereel_time\n\
                 import matplotlib.pyplot as __codereel_plt\n\
                 __codereel_time.sleep({sleep})\n\
                 __codereel_plt.savefig({target})\n"
            ),
        ),
        GraphicsLibrary::GameLoop => match splice_teardown_calls(code, &target) {
            Some(out) => out,
            None => splice_before_teardown(code, &target),
        },
        GraphicsLibrary::TurtleGraphics => {
            let eps = py_string_literal(TURTLE_EPS);
            append(
                code,
                &format!(
                    "import time as __codereel_time\n\
                     import turtle as __codereel_turtle\n\
                     __codereel_time.sleep({sleep})\n\
                     __codereel_turtle.getscreen().getcanvas().postscript(file={eps})\n\
                     try:\n\
                     \x20   from PIL import Image as __codereel_image\n\
                     \x20   __codereel_image.open({eps}).save({target})\n\
                     except Exception as __codereel_error:\n\
                     \x20   import sys as __codereel_sys\n\
                     \x20   print('canvas conversion failed:', __codereel_error,\n\
                     \x20         file=__codereel_sys.stderr)\n"
                ),
            )
        }
        GraphicsLibrary::Unknown => append(
            code,
            &format!(
                "try:\n\
                 \x20   import matplotlib.pyplot as __codereel_plt\n\
                 \x20   __codereel_plt.savefig({target})\n\
                 except Exception:\n\
                 \x20   pass\n"
            ),
        ),
    }
}

fn append(code: &str, hook: &str) -> String {
    let mut out = String::with_capacity(code.len() + hook.len() + 2);
    out.push_str(code);
    if !code.ends_with('\n') {
        out.push('\n');
    }
    out.push('\n');
    out.push_str(hook);
    out
}

fn surface_save(indent: &str, target: &str) -> String {
    format!(
        "{indent}import pygame as __codereel_pygame\n\
         {indent}if __codereel_pygame.display.get_surface() is not None: \
         __codereel_pygame.image.save(__codereel_pygame.display.get_surface(), {target})\n"
    )
}

const SAVE_SURFACE_FN: &str = "__codereel_save_surface";

/// Finds `pygame.quit()` expression statements at any nesting depth.
#[derive(Default)]
struct TeardownFinder {
    offsets: Vec<usize>,
}

impl Visitor for TeardownFinder {
    fn visit_stmt_expr(&mut self, node: ast::StmtExpr) {
        if let ast::Expr::Call(call) = node.value.as_ref() {
            if callee_path(&call.func).as_deref() == Some("pygame.quit") {
                self.offsets.push(u32::from(node.range.start()) as usize);
            }
        }
    }

    fn visit_match_case(&mut self, node: ast::MatchCase) {
        for stmt in node.body {
            self.visit_stmt(stmt);
        }
    }
}

/// Call a save helper right before every `pygame.quit()` statement, in the
/// same statement list, so one-line bodies such as
/// `if quit: pygame.quit(); sys.exit()` are covered. The helper is defined
/// at the top of the module, after any `from __future__` imports. Without a
/// teardown statement the call is appended. `None` when the code does not
/// parse.
fn splice_teardown_calls(code: &str, target: &str) -> Option<String> {
    let suite = match ast::Suite::parse(code, "<generated>") {
        Ok(suite) => suite,
        Err(e) => {
            debug!(error = %e, "Game loop did not parse, splicing by line");
            return None;
        }
    };

    let header_end = suite
        .iter()
        .filter_map(|stmt| match stmt {
            ast::Stmt::ImportFrom(import)
                if import.module.as_ref().map(|m| m.as_str()) == Some("__future__") =>
            {
                Some(u32::from(import.range.end()) as usize)
            }
            _ => None,
        })
        .last();

    let mut finder = TeardownFinder::default();
    for stmt in suite {
        finder.visit_stmt(stmt);
    }

    let helper = format!(
        "def {SAVE_SURFACE_FN}():
             import pygame as __codereel_pygame
             __codereel_surface = __codereel_pygame.display.get_surface()
             if __codereel_surface is not None:
                 __codereel_pygame.image.save(__codereel_surface, {target})
"
    );

    let mut out = code.to_string();
    if finder.offsets.is_empty() {
        out = append(&out, &format!("{helper}
{SAVE_SURFACE_FN}()
"));
        return Some(out);
    }

    // Back to front, so earlier offsets stay valid.
    finder.offsets.sort_unstable();
    for offset in finder.offsets.into_iter().rev() {
        out.insert_str(offset, &format!("{SAVE_SURFACE_FN}(); "));
    }
    match header_end {
        Some(end) => out.insert_str(end, &format!("
{helper}")),
        None => out.insert_str(0, &format!("{helper}
")),
    }
    Some(out)
}

/// Insert the surface save before every line that starts with the teardown
/// call, at that line's indentation. Without such a line the save is appended.
fn splice_before_teardown(code: &str, target: &str) -> String {
    let mut out = String::with_capacity(code.len() + 256);
    let mut spliced = false;

    for line in code.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with(GAME_TEARDOWN) {
            let indent = &line[..line.len() - trimmed.len()];
            out.push_str(&surface_save(indent, target));
            spliced = true;
        }
        out.push_str(line);
        out.push('\n');
    }

    if spliced {
        out
    } else {
        append(code, &surface_save("", target))
    }
}

/// Quote `s` as a single-quoted Python string literal.
fn py_string_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}
