//! Temporary R package libraries for tests and benchmarks.
//!
//! A library is a directory of package directories, each with a DESCRIPTION,
//! an optional NAMESPACE and R sources under `R/`, which is the layout the
//! package index reads.

use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Formals of `stats::aov`.
pub const AOV_FORMALS: &str =
    "formula, data = NULL, projections = FALSE, qr = TRUE, contrasts = NULL, ...";

/// Formals of `graphics::legend`.
pub const LEGEND_FORMALS: &str = "x, y = NULL, legend, fill = NULL, col = par(\"col\"), \
border = \"black\", lty, lwd, pch, angle = 45, density = NULL, bty = \"o\", \
bg = par(\"bg\"), box.lwd = par(\"lwd\"), box.lty = par(\"lty\"), box.col = par(\"fg\"), \
pt.bg = NA, cex = 1, pt.cex = cex, pt.lwd = lwd, xjust = 0, yjust = 1, \
x.intersp = 1, y.intersp = 1, adj = c(0, 0.5), text.width = NULL, \
text.col = par(\"col\"), text.font = NULL, merge = do.lines && has.pch, \
trace = FALSE, plot = TRUE, ncol = 1, horiz = FALSE, title = NULL, inset = 0, \
xpd, title.col = text.col[1], title.adj = 0.5, seg.len = 2";

/// A package library in a temporary directory, removed on drop.
pub struct FixtureLibrary {
    dir: TempDir,
}

impl FixtureLibrary {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory for fixture library");
        Self { dir }
    }

    /// A library with small `base`, `stats`, `graphics` and `utils` packages.
    pub fn with_standard_packages() -> Self {
        let library = Self::new();
        library
            .package("base")
            .description("Title: The R Base Package\n")
            .namespace("exportPattern(\"^[^\\\\.]\")\n")
            .source(
                "base.R",
                "paste <- function(..., sep = \" \", collapse = NULL, recycle0 = FALSE) NULL\n\
                 print <- function(x, ...) UseMethod(\"print\")\n\
                 .internal_helper <- function(x) x\n",
            )
            .write();
        library
            .package("stats")
            .description("Title: The R Stats Package\nDescription: R statistical functions.\n")
            .namespace("export(aov, lm)\nS3method(print, aov)\n")
            .source(
                "aov.R",
                &format!(
                    "aov <- function({AOV_FORMALS}) {{\n  aov_helper(formula)\n}}\n\
                     aov_helper <- function(f) f\n\
                     print.aov <- function(x, intercept = FALSE, tol = sqrt(.Machine$double.eps), ...) invisible(x)\n"
                ),
            )
            .source(
                "lm.R",
                "lm <- function(formula, data, subset, weights, na.action, method = \"qr\", ...) NULL\n",
            )
            .write();
        library
            .package("graphics")
            .description("Title: The R Graphics Package\nDepends: R (>= 4.0.0), grDevices\n")
            .namespace("export(legend)\nexport(plot)\n")
            .source(
                "legend.R",
                &format!("legend <- function({LEGEND_FORMALS}) {{\n  invisible(NULL)\n}}\n"),
            )
            .source("plot.R", "plot <- function(x, y, ...) UseMethod(\"plot\")\n")
            .write();
        library
            .package("utils")
            .description("Title: The R Utils Package\n")
            .namespace("export(head)\n")
            .source("head.R", "head <- function(x, ...) UseMethod(\"head\")\n")
            .write();
        library
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Start describing a package to be written into this library.
    pub fn package(&self, name: &str) -> FixturePackage<'_> {
        FixturePackage {
            library: self,
            name: name.to_string(),
            description: String::new(),
            namespace: None,
            sources: Vec::new(),
        }
    }
}

impl Default for FixtureLibrary {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for one package directory.
pub struct FixturePackage<'a> {
    library: &'a FixtureLibrary,
    name: String,
    description: String,
    namespace: Option<String>,
    sources: Vec<(String, String)>,
}

impl FixturePackage<'_> {
    /// Extra DESCRIPTION fields, appended after `Package` and `Version`.
    pub fn description(mut self, fields: &str) -> Self {
        self.description.push_str(fields);
        self
    }

    pub fn namespace(mut self, content: &str) -> Self {
        self.namespace = Some(content.to_string());
        self
    }

    /// Add `R/<file>`.
    pub fn source(mut self, file: &str, content: &str) -> Self {
        self.sources.push((file.to_string(), content.to_string()));
        self
    }

    /// Write the package and return its directory.
    pub fn write(self) -> PathBuf {
        let dir = self.library.path().join(&self.name);
        let r_dir = dir.join("R");
        std::fs::create_dir_all(&r_dir)
            .unwrap_or_else(|e| panic!("Failed to create package {}: {}", self.name, e));

        let description = format!("Package: {}\nVersion: 1.0.0\n{}", self.name, self.description);
        std::fs::write(dir.join("DESCRIPTION"), description)
            .unwrap_or_else(|e| panic!("Failed to write DESCRIPTION for {}: {}", self.name, e));
        if let Some(namespace) = &self.namespace {
            std::fs::write(dir.join("NAMESPACE"), namespace)
                .unwrap_or_else(|e| panic!("Failed to write NAMESPACE for {}: {}", self.name, e));
        }
        for (file, content) in &self.sources {
            std::fs::write(r_dir.join(file), content)
                .unwrap_or_else(|e| panic!("Failed to write {}/R/{}: {}", self.name, file, e));
        }
        dir
    }
}
