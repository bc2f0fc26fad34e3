//! Text report: rebuilds the scope tree from a flat path-keyed register.
//!
//! Each scope with recorded calls and nested scopes gets a block: a header
//! with its own totals, then one row per direct child sorted by duration
//! descending, then a synthetic `total` row. Children are then visited the
//! same way, depth first. Ratios are shown against the enclosing scope and
//! against the top-level scope the subtree belongs to.

use std::io::{self, Write};

use crate::record::{Record, Register};

const SEP: &str = "::";
const RULE_WIDTH: usize = 80;
const INDENT: usize = 3;
const NAME_WIDTH: usize = 14;
const NUM_WIDTH: usize = 10;

/// Optional report columns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportOptions {
    /// Timer overhead in seconds and as a fraction of the measured time.
    pub overhead: bool,
    /// Mean, RMS deviation and maximum per call.
    pub variance: bool,
}

/// Write the tree for `register` to `out`.
pub fn write_tree<W: Write + ?Sized>(
    register: &Register,
    options: &ReportOptions,
    out: &mut W,
) -> io::Result<()> {
    if register.is_empty() {
        writeln!(out, "no scopes recorded")?;
        return writeln!(out, "{}\n\n", "-".repeat(RULE_WIDTH));
    }
    if register.len() == 1 {
        if let Some((path, record)) = register.iter().next() {
            write_header(out, options, path, record)?;
        }
        return writeln!(out, "{}\n\n", "-".repeat(RULE_WIDTH));
    }

    let mut printer = Printer {
        register,
        options,
        out,
        root: None,
    };
    printer.walk("", &Record::default(), 0)
}

/// Render `num / den` as a percentage, or `n/a` when undefined.
pub fn percent(num: f64, den: f64) -> String {
    let ratio = num / den;
    if ratio.is_finite() {
        format!("{:.1}%", ratio * 100.0)
    } else {
        "n/a".to_string()
    }
}

struct Printer<'a, W: ?Sized> {
    register: &'a Register,
    options: &'a ReportOptions,
    out: &'a mut W,
    /// Top-level scope of the subtree being printed.
    root: Option<(&'a str, Record)>,
}

impl<'a, W: Write + ?Sized> Printer<'a, W> {
    fn walk(&mut self, prefix: &str, record: &Record, depth: usize) -> io::Result<()> {
        let children = self.children_of(prefix);

        if record.count > 0 && !children.is_empty() {
            let label = prefix.strip_suffix(SEP).unwrap_or(prefix);
            write_header(&mut *self.out, self.options, label, record)?;
            self.write_columns(depth)?;

            let mut total = Record::default();
            for (name, child) in &children {
                self.write_row(depth, name, child, record.duration, false)?;
                total.count += child.count;
                total.duration += child.duration;
                total.overhead += child.overhead;
            }
            self.write_row(depth, "total", &total, record.duration, true)?;
        }

        for (name, child) in &children {
            if depth == 0 {
                self.root = Some((*name, *child));
            }
            let nested = format!("{prefix}{name}{SEP}");
            self.walk(&nested, child, depth + 1)?;
        }

        if depth == 0 {
            writeln!(self.out, "{}\n\n", "-".repeat(RULE_WIDTH))?;
        }
        Ok(())
    }

    /// Direct children of `prefix`, longest duration first. Ties keep
    /// lexical order so output is stable.
    fn children_of(&self, prefix: &str) -> Vec<(&'a str, Record)> {
        let register: &'a Register = self.register;
        let mut children: Vec<(&'a str, Record)> = register
            .iter()
            .filter_map(|(path, rec)| {
                let rest = path.strip_prefix(prefix)?;
                if rest.is_empty() || rest.contains(SEP) {
                    return None;
                }
                Some((rest, *rec))
            })
            .collect();
        children.sort_by(|a, b| a.0.cmp(b.0));
        children.sort_by(|a, b| {
            b.1.duration
                .partial_cmp(&a.1.duration)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        children
    }

    fn root_name(&self) -> &str {
        self.root.as_ref().map_or("root", |(name, _)| name)
    }

    fn root_duration(&self) -> f64 {
        self.root.as_ref().map_or(f64::NAN, |(_, rec)| rec.duration)
    }

    fn write_columns(&mut self, depth: usize) -> io::Result<()> {
        let root_col = format!("%{}", self.root_name());
        let root_width = NUM_WIDTH.max(root_col.len());
        let lead = format!("L-{depth}");
        write!(
            self.out,
            "{:<indent$}{:<name$}  {:>num$}  {:>num$}  {:>num$}  {:>root$}",
            lead,
            "name",
            "calls",
            "t[s]",
            "%parent",
            root_col,
            indent = depth * INDENT,
            name = NAME_WIDTH,
            num = NUM_WIDTH,
            root = root_width,
        )?;
        if self.options.overhead {
            write!(
                self.out,
                "  {:>num$}  {:>num$}",
                "oh[s]",
                "oh/t",
                num = NUM_WIDTH
            )?;
        }
        if self.options.variance {
            write!(
                self.out,
                "  {:>num$}  {:>num$}  {:>num$}",
                "mean[s]",
                "rms[s]",
                "max[s]",
                num = NUM_WIDTH
            )?;
        }
        writeln!(self.out)
    }

    fn write_row(
        &mut self,
        depth: usize,
        name: &str,
        rec: &Record,
        parent_duration: f64,
        is_total: bool,
    ) -> io::Result<()> {
        let root_width = NUM_WIDTH.max(self.root_name().len() + 1);
        let of_root = percent(rec.duration, self.root_duration());
        write!(
            self.out,
            "{:indent$}{:.<name_w$}:  {:>num$}  {:>num$.3e}  {:>num$}  {:>root$}",
            "",
            name,
            rec.count,
            rec.duration,
            percent(rec.duration, parent_duration),
            of_root,
            indent = depth * INDENT,
            name_w = NAME_WIDTH - 1,
            num = NUM_WIDTH,
            root = root_width,
        )?;
        if self.options.overhead {
            write!(
                self.out,
                "  {:>num$.2e}  {:>num$}",
                rec.overhead,
                percent(rec.overhead, rec.duration),
                num = NUM_WIDTH
            )?;
        }
        if self.options.variance && !is_total {
            write!(
                self.out,
                "  {:>num$.2e}  {:>num$.2e}  {:>num$.2e}",
                rec.mean(),
                rec.rms(),
                rec.stats.max,
                num = NUM_WIDTH
            )?;
        }
        writeln!(self.out)
    }
}

fn write_header<W: Write + ?Sized>(
    out: &mut W,
    options: &ReportOptions,
    label: &str,
    rec: &Record,
) -> io::Result<()> {
    writeln!(out, "{}", "=".repeat(RULE_WIDTH))?;
    write!(
        out,
        "{label}: calls: {}, time: {:.3e} s",
        rec.count, rec.duration
    )?;
    if options.overhead {
        write!(out, ", overhead: {:.3e} s", rec.overhead)?;
    }
    writeln!(out)?;
    writeln!(out, "{}", "-".repeat(RULE_WIDTH))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reg(entries: &[(&str, u64, f64)]) -> Register {
        entries
            .iter()
            .map(|&(p, count, duration)| {
                (
                    p.to_string(),
                    Record {
                        count,
                        duration,
                        ..Record::default()
                    },
                )
            })
            .collect()
    }

    fn render(register: &Register, options: ReportOptions) -> String {
        let mut buf = Vec::new();
        write_tree(register, &options, &mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    fn row<'a>(text: &'a str, name: &str) -> &'a str {
        text.lines()
            .find(|l| l.trim_start().starts_with(&format!("{name}.")))
            .unwrap_or_else(|| panic!("no row for {name} in:\n{text}"))
    }

    fn row_index(text: &str, name: &str) -> usize {
        text.lines()
            .position(|l| l.trim_start().starts_with(&format!("{name}.")))
            .unwrap_or_else(|| panic!("no row for {name} in:\n{text}"))
    }

    #[test]
    fn percent_handles_zero_and_nan() {
        assert_eq!(percent(2.5, 10.0), "25.0%");
        assert_eq!(percent(1.0, 0.0), "n/a");
        assert_eq!(percent(0.0, 0.0), "n/a");
        assert_eq!(percent(1.0, f64::NAN), "n/a");
        assert_eq!(percent(0.0, 4.0), "0.0%");
    }

    #[test]
    fn single_entry_prints_header_only() {
        let text = render(&reg(&[("main", 1, 0.5)]), ReportOptions::default());
        assert!(text.contains("main: calls: 1"), "{text}");
        assert!(!text.contains("%parent"), "{text}");
    }

    #[test]
    fn empty_register_says_so() {
        let text = render(&Register::new(), ReportOptions::default());
        assert!(text.contains("no scopes recorded"));
    }

    #[test]
    fn child_percent_of_parent() {
        let text = render(
            &reg(&[("root", 1, 10.0), ("root::child", 1, 2.5), ("root::other", 1, 5.0)]),
            ReportOptions::default(),
        );
        let child = row(&text, "child");
        assert!(child.contains("25.0%"), "{child}");
        let other = row(&text, "other");
        assert!(other.contains("50.0%"), "{other}");
        // total row sums children: 7.5 / 10
        let total = row(&text, "total");
        assert!(total.contains("75.0%"), "{total}");
    }

    #[test]
    fn siblings_sorted_by_duration_descending() {
        let text = render(
            &reg(&[
                ("main", 1, 10.0),
                ("main::indent", 1, 3.0),
                ("main::indent::bent", 1, 0.3),
                ("main::indent::dent", 1, 1.5),
                ("main::indent::bore", 1, 0.2),
            ]),
            ReportOptions::default(),
        );
        let dent = row_index(&text, "dent");
        let bent = row_index(&text, "bent");
        let bore = row_index(&text, "bore");
        assert!(dent < bent && bent < bore, "{text}");
    }

    #[test]
    fn percent_of_root_uses_top_level_scope() {
        let text = render(
            &reg(&[
                ("main", 1, 8.0),
                ("main::a", 1, 4.0),
                ("main::a::leaf", 1, 2.0),
            ]),
            ReportOptions::default(),
        );
        assert!(text.contains("%main"), "{text}");
        let leaf = row(&text, "leaf");
        // 2/4 of parent, 2/8 of root
        assert!(leaf.contains("50.0%"), "{leaf}");
        assert!(leaf.contains("25.0%"), "{leaf}");
    }

    #[test]
    fn zero_duration_root_renders_na() {
        let text = render(
            &reg(&[("main", 1, 0.0), ("main::a", 1, 0.0)]),
            ReportOptions::default(),
        );
        let a = row(&text, "a");
        assert!(a.contains("n/a"), "{a}");
    }

    #[test]
    fn zero_count_intermediate_path_gets_no_header() {
        let text = render(
            &reg(&[
                ("main", 1, 5.0),
                ("main::ghost", 0, 0.0),
                ("main::ghost::x", 1, 1.0),
            ]),
            ReportOptions::default(),
        );
        assert!(text.contains("main: calls: 1"), "{text}");
        assert!(!text.contains("main::ghost: calls"), "{text}");
    }

    #[test]
    fn every_nested_scope_with_children_gets_a_block() {
        let text = render(
            &reg(&[
                ("main", 1, 5.0),
                ("main::hello", 1, 4.0),
                ("main::hello::indent", 1, 2.0),
                ("main::hello::indent::dent", 1, 1.5),
            ]),
            ReportOptions::default(),
        );
        assert!(text.contains("main: calls"), "{text}");
        assert!(text.contains("main::hello: calls"), "{text}");
        assert!(text.contains("main::hello::indent: calls"), "{text}");
        assert!(text.contains("L-3"), "{text}");
    }

    #[test]
    fn optional_columns_follow_options() {
        let mut register = Register::new();
        {
            let main = register.get_or_create("main");
            main.add_sample(2.0, true);
            main.overhead = 0.001;
        }
        {
            let a = register.get_or_create("main::a");
            a.add_sample(0.5, true);
            a.add_sample(1.5, true);
            a.overhead = 0.002;
        }

        let plain = render(&register, ReportOptions::default());
        assert!(!plain.contains("oh[s]"));
        assert!(!plain.contains("rms[s]"));

        let full = render(
            &register,
            ReportOptions {
                overhead: true,
                variance: true,
            },
        );
        assert!(full.contains("oh[s]"), "{full}");
        assert!(full.contains("rms[s]"), "{full}");
        assert!(full.contains("overhead:"), "{full}");
        // mean 1.0, rms 0.5, max 1.5
        let a = row(&full, "a");
        assert!(a.contains("1.00e0"), "{a}");
        assert!(a.contains("5.00e-1"), "{a}");
        assert!(a.contains("1.50e0"), "{a}");
        // total row carries no variance columns
        let total = row(&full, "total");
        assert!(!total.contains("1.50e0"), "{total}");
    }
}
