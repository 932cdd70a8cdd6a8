//! Strict line-based parser for routing-structs dump files.
//!
//! A dump contains up to five sections: `.rr_node`, `.rr_switch`,
//! `.block_type`, `.grid`, and `.rr_node_indices`. In [`StructsMode::Simple`]
//! only the node section is allowed. Indices inside every section must appear
//! in strictly ascending order.

use std::path::Path;

use crate::arch::{Arch, BlockType, GridTile, PinClass, PinKind};
use crate::error::{Error, InitError};
use crate::graph::{Direction, NodeId, NodeKind, RoutingGraph, RrNode, Switch, NUM_NODE_KINDS};
use crate::opts::StructsMode;

/// Reads, parses, and finalizes a routing-structs file.
///
/// Finalization derives incoming edges, attaches a virtual source to every
/// sink (VPR mode only), determines the fill block type, and initializes node
/// weights.
pub fn load(path: impl AsRef<Path>, mode: StructsMode) -> Result<(Arch, RoutingGraph), Error> {
    let input = std::fs::read_to_string(path).map_err(InitError::Io)?;
    let (arch, mut graph) = parse_str(&input, mode).map_err(InitError::Parse)?;
    graph.rebuild_in_edges();
    if mode == StructsMode::Vpr {
        graph.add_virtual_sources()?;
    }
    graph.init_weights();
    log::info!(
        "loaded routing graph: {} nodes, {} switch types",
        graph.num_nodes(),
        graph.switches().len()
    );
    Ok((arch, graph))
}

/// Parses dump text into unfinalized structures.
pub(crate) fn parse_str(
    input: &str,
    mode: StructsMode,
) -> Result<(Arch, RoutingGraph), ParseError> {
    let mut lines = Lines::new(input);
    let mut arch = Arch::default();
    let mut nodes = Vec::new();
    let mut switches = Vec::new();
    let mut lookup = Vec::new();

    while let Some((line_no, line)) = lines.next_line() {
        if line.is_empty() {
            continue;
        }
        if let Some(header) = line.strip_prefix(".rr_node(") {
            let count = header_count(header, line_no)?;
            nodes = parse_node_section(&mut lines, count)?;
        } else if let Some(header) = line.strip_prefix(".rr_switch(") {
            require_vpr(mode, line_no, line)?;
            let count = header_count(header, line_no)?;
            switches = parse_switch_section(&mut lines, count)?;
        } else if let Some(header) = line.strip_prefix(".block_type(") {
            require_vpr(mode, line_no, line)?;
            let count = header_count(header, line_no)?;
            arch.block_types = parse_block_type_section(&mut lines, count)?;
        } else if let Some(header) = line.strip_prefix(".grid(") {
            require_vpr(mode, line_no, line)?;
            let (x_size, y_size) = header_pair(header, line_no)?;
            arch.grid = parse_grid_section(&mut lines, x_size, y_size)?;
            arch.set_fill_type();
        } else if let Some(header) = line.strip_prefix(".rr_node_indices(") {
            require_vpr(mode, line_no, line)?;
            let (num_kinds, x_size, y_size) = header_triple(header, line_no)?;
            if num_kinds != NUM_NODE_KINDS {
                return Err(ParseError::KindCountMismatch {
                    line_no,
                    expected: NUM_NODE_KINDS,
                    found: num_kinds,
                });
            }
            lookup = parse_node_index_section(&mut lines, num_kinds, x_size, y_size)?;
        } else {
            return Err(ParseError::UnexpectedLine {
                line_no,
                line: line.to_owned(),
            });
        }
    }

    // edge targets must refer to declared nodes
    for node in &nodes {
        for &to in node.out_edges() {
            if to.inner() >= nodes.len() {
                return Err(ParseError::EdgeOutOfRange {
                    target: to.inner(),
                    num_nodes: nodes.len(),
                });
            }
        }
    }

    Ok((arch, RoutingGraph::from_parts(nodes, switches, lookup)))
}

fn require_vpr(mode: StructsMode, line_no: usize, line: &str) -> Result<(), ParseError> {
    if mode == StructsMode::Simple {
        return Err(ParseError::SectionNotAllowed {
            line_no,
            section: line.to_owned(),
        });
    }
    Ok(())
}

fn parse_node_section(lines: &mut Lines, count: usize) -> Result<Vec<RrNode>, ParseError> {
    let mut nodes = Vec::with_capacity(count);
    loop {
        let (line_no, line) = lines.expect_line()?;
        if line == ".end rr_node" {
            break;
        }
        let index = indexed_prefix(line, "node_", line_no)?;
        if index != nodes.len() {
            return Err(ParseError::OutOfOrder {
                line_no,
                what: "rr node",
            });
        }
        let kind = match field(line, "rr_type", line_no)? {
            "SOURCE" => NodeKind::Source,
            "SINK" => NodeKind::Sink,
            "IPIN" => NodeKind::IPin,
            "OPIN" => NodeKind::OPin,
            "CHANX" => NodeKind::ChanX,
            "CHANY" => NodeKind::ChanY,
            other => {
                return Err(ParseError::UnknownNodeKind {
                    line_no,
                    kind: other.to_owned(),
                })
            }
        };
        let xlow: usize = parse_field(line, "xlow", line_no)?;
        let xhigh: usize = parse_field(line, "xhigh", line_no)?;
        let ylow: usize = parse_field(line, "ylow", line_no)?;
        let yhigh: usize = parse_field(line, "yhigh", line_no)?;
        let ptc: usize = parse_field(line, "ptc_num", line_no)?;
        let fan_in: usize = parse_field(line, "fan_in", line_no)?;
        let direction: i32 = parse_field(line, "direction", line_no)?;
        let r: f32 = parse_field(line, "R", line_no)?;
        let c: f32 = parse_field(line, "C", line_no)?;

        let id = NodeId::new(index);
        let mut node = RrNode::new(id, kind, xlow, ylow, xhigh, yhigh, ptc)
            .map_err(|_| ParseError::BothSpans { line_no, index })?;
        node.set_electrical(r, c, fan_in, Direction::from_code(direction));

        let (line_no, line) = lines.expect_line()?;
        let num_edges = match line.strip_prefix(".edges(") {
            Some(rest) => header_count(rest, line_no)?,
            None => {
                return Err(ParseError::UnexpectedLine {
                    line_no,
                    line: line.to_owned(),
                })
            }
        };
        let mut iedge = 0;
        loop {
            let (line_no, line) = lines.expect_line()?;
            if line == ".end edges" {
                break;
            }
            if iedge >= num_edges {
                return Err(ParseError::CountMismatch {
                    line_no,
                    what: "edges",
                    expected: num_edges,
                });
            }
            let (edge_index, rest) = numbered_entry(line, line_no)?;
            if edge_index != iedge {
                return Err(ParseError::OutOfOrder {
                    line_no,
                    what: "edge",
                });
            }
            let to: usize = parse_field(rest, "edge", line_no)?;
            let switch: usize = parse_field(rest, "switch", line_no)?;
            node.push_edge(NodeId::new(to), switch);
            iedge += 1;
        }
        nodes.push(node);
    }
    if nodes.len() != count {
        return Err(ParseError::CountMismatch {
            line_no: 0,
            what: "rr nodes",
            expected: count,
        });
    }
    Ok(nodes)
}

fn parse_switch_section(lines: &mut Lines, count: usize) -> Result<Vec<Switch>, ParseError> {
    let mut switches = Vec::with_capacity(count);
    loop {
        let (line_no, line) = lines.expect_line()?;
        if line == ".end rr_switch" {
            break;
        }
        let index = indexed_prefix(line, "switch_", line_no)?;
        if index != switches.len() {
            return Err(ParseError::OutOfOrder {
                line_no,
                what: "rr switch",
            });
        }
        let buffered: i32 = parse_field(line, "buffered", line_no)?;
        switches.push(Switch {
            buffered: buffered != 0,
            r: parse_field(line, "R", line_no)?,
            cin: parse_field(line, "Cin", line_no)?,
            cout: parse_field(line, "Cout", line_no)?,
            tdel: parse_field(line, "Tdel", line_no)?,
            mux_trans_size: parse_field(line, "mux_trans_size", line_no)?,
            buf_size: parse_field(line, "buf_size", line_no)?,
        });
    }
    if switches.len() != count {
        return Err(ParseError::CountMismatch {
            line_no: 0,
            what: "rr switches",
            expected: count,
        });
    }
    Ok(switches)
}

fn parse_block_type_section(lines: &mut Lines, count: usize) -> Result<Vec<BlockType>, ParseError> {
    let mut types = Vec::with_capacity(count);
    loop {
        let (line_no, line) = lines.expect_line()?;
        if line == ".end block_type" {
            break;
        }
        let index = indexed_prefix(line, "type_", line_no)?;
        if index != types.len() {
            return Err(ParseError::OutOfOrder {
                line_no,
                what: "block type",
            });
        }
        let mut block = BlockType {
            name: field(line, "name", line_no)?.to_owned(),
            index: parse_field(line, "index", line_no)?,
            num_pins: parse_field(line, "num_pins", line_no)?,
            width: parse_field(line, "width", line_no)?,
            // tolerates the dump's stray space in "height (h)"
            height: parse_field(line, "height", line_no)?,
            num_drivers: parse_field(line, "num_drivers", line_no)?,
            num_receivers: parse_field(line, "num_receivers", line_no)?,
            ..BlockType::default()
        };
        let num_classes: usize = parse_field(line, "num_class", line_no)?;

        lines.skip_header()?;
        for iclass in 0..num_classes {
            let (line_no, line) = lines.expect_line()?;
            let (class_index, rest) = numbered_entry(line, line_no)?;
            if class_index != iclass {
                return Err(ParseError::OutOfOrder {
                    line_no,
                    what: "pin class",
                });
            }
            let code: i32 = parse_field(rest, "pin_type", line_no)?;
            let kind = PinKind::from_code(code)
                .ok_or(ParseError::BadPinKind { line_no, code })?;
            let num_class_pins: usize = parse_field(rest, "num_pins", line_no)?;
            let mut class = PinClass {
                kind: Some(kind),
                pins: Vec::with_capacity(num_class_pins),
            };
            lines.skip_header()?;
            for ipin in 0..num_class_pins {
                let (line_no, line) = lines.expect_line()?;
                let (pin_index, rest) = numbered_entry(line, line_no)?;
                if pin_index != ipin {
                    return Err(ParseError::OutOfOrder {
                        line_no,
                        what: "class pin",
                    });
                }
                class.pins.push(parse_value(rest, line_no)?);
            }
            lines.expect_marker(".end pinlist")?;
            block.classes.push(class);
        }
        lines.expect_marker(".end classes")?;

        lines.skip_header()?;
        for ipin in 0..block.num_pins {
            let (line_no, line) = lines.expect_line()?;
            let (pin_index, rest) = numbered_entry(line, line_no)?;
            if pin_index != ipin {
                return Err(ParseError::OutOfOrder {
                    line_no,
                    what: "pin_class entry",
                });
            }
            block.pin_class.push(parse_value(rest, line_no)?);
        }
        lines.expect_marker(".end pin_class")?;

        lines.skip_header()?;
        for ipin in 0..block.num_pins {
            let (line_no, line) = lines.expect_line()?;
            let (pin_index, rest) = numbered_entry(line, line_no)?;
            if pin_index != ipin {
                return Err(ParseError::OutOfOrder {
                    line_no,
                    what: "is_global_pin entry",
                });
            }
            let global: i32 = parse_value(rest, line_no)?;
            block.is_global_pin.push(global != 0);
        }
        lines.expect_marker(".end is_global_pin")?;

        types.push(block);
    }
    if types.len() != count {
        return Err(ParseError::CountMismatch {
            line_no: 0,
            what: "block types",
            expected: count,
        });
    }
    Ok(types)
}

fn parse_grid_section(
    lines: &mut Lines,
    x_size: usize,
    y_size: usize,
) -> Result<Vec<Vec<GridTile>>, ParseError> {
    let mut grid = vec![vec![GridTile::default(); y_size]; x_size];
    let mut read = 0;
    loop {
        let (line_no, line) = lines.expect_line()?;
        if line == ".end grid" {
            break;
        }
        let coords = line
            .strip_prefix("grid_x")
            .and_then(|rest| rest.split_once(':'))
            .map(|(coords, _)| coords)
            .ok_or_else(|| ParseError::UnexpectedLine {
                line_no,
                line: line.to_owned(),
            })?;
        let (x, y) = coords
            .split_once("_y")
            .and_then(|(x, y)| Some((x.parse::<usize>().ok()?, y.parse::<usize>().ok()?)))
            .ok_or_else(|| ParseError::UnexpectedLine {
                line_no,
                line: line.to_owned(),
            })?;
        let tile = grid
            .get_mut(x)
            .and_then(|col| col.get_mut(y))
            .ok_or_else(|| ParseError::UnexpectedLine {
                line_no,
                line: line.to_owned(),
            })?;
        tile.type_index = parse_field(line, "block_type_index", line_no)?;
        tile.width_offset = parse_field(line, "width_offset", line_no)?;
        tile.height_offset = parse_field(line, "height_offset", line_no)?;
        read += 1;
    }
    if read != x_size * y_size {
        return Err(ParseError::CountMismatch {
            line_no: 0,
            what: "grid tiles",
            expected: x_size * y_size,
        });
    }
    Ok(grid)
}

fn parse_node_index_section(
    lines: &mut Lines,
    num_kinds: usize,
    x_size: usize,
    y_size: usize,
) -> Result<Vec<Vec<Vec<Vec<Option<NodeId>>>>>, ParseError> {
    let mut table = vec![vec![vec![Vec::new(); y_size]; x_size]; num_kinds];
    loop {
        let (line_no, line) = lines.expect_line()?;
        if line == ".end rr_node_indices" {
            break;
        }
        let coords = line
            .strip_prefix("rr_node_index_type")
            .ok_or_else(|| ParseError::UnexpectedLine {
                line_no,
                line: line.to_owned(),
            })?;
        let parsed: Option<(usize, usize, usize)> = (|| {
            let (kind, rest) = coords.split_once("_x")?;
            let (x, y) = rest.split_once("_y")?;
            Some((kind.parse().ok()?, x.parse().ok()?, y.parse().ok()?))
        })();
        let (kind, x, y) = parsed.ok_or_else(|| ParseError::UnexpectedLine {
            line_no,
            line: line.to_owned(),
        })?;

        let (line_no, line) = lines.expect_line()?;
        let num_nodes = match line.strip_prefix(".nodes(") {
            Some(rest) => header_count(rest, line_no)?,
            None => {
                return Err(ParseError::UnexpectedLine {
                    line_no,
                    line: line.to_owned(),
                })
            }
        };
        let slots = table
            .get_mut(kind)
            .and_then(|t| t.get_mut(x))
            .and_then(|t| t.get_mut(y))
            .ok_or_else(|| ParseError::UnexpectedLine {
                line_no,
                line: line.to_owned(),
            })?;
        *slots = vec![None; num_nodes];
        loop {
            let (line_no, line) = lines.expect_line()?;
            if line == ".end nodes" {
                break;
            }
            let (slot, rest) = numbered_entry(line, line_no)?;
            if slot >= slots.len() {
                return Err(ParseError::CountMismatch {
                    line_no,
                    what: "node index entries",
                    expected: num_nodes,
                });
            }
            slots[slot] = Some(NodeId::new(parse_value(rest, line_no)?));
        }
    }
    Ok(table)
}

/// Trimmed-line cursor with 1-based line numbers.
struct Lines<'a> {
    iter: std::iter::Enumerate<std::str::Lines<'a>>,
}

impl<'a> Lines<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            iter: input.lines().enumerate(),
        }
    }

    fn next_line(&mut self) -> Option<(usize, &'a str)> {
        self.iter.next().map(|(i, line)| (i + 1, line.trim()))
    }

    fn expect_line(&mut self) -> Result<(usize, &'a str), ParseError> {
        self.next_line().ok_or(ParseError::UnexpectedEof)
    }

    /// Consumes a section header line without inspecting it.
    fn skip_header(&mut self) -> Result<(), ParseError> {
        self.expect_line().map(|_| ())
    }

    fn expect_marker(&mut self, marker: &'static str) -> Result<(), ParseError> {
        let (line_no, line) = self.expect_line()?;
        if line != marker {
            return Err(ParseError::ExpectedMarker {
                line_no,
                marker,
                line: line.to_owned(),
            });
        }
        Ok(())
    }
}

/// Extracts the value of a `key(value)` field.
fn field<'a>(line: &'a str, key: &str, line_no: usize) -> Result<&'a str, ParseError> {
    let mut search = line;
    loop {
        let at = search.find(key).ok_or(ParseError::MissingField {
            line_no,
            field: key.trim().to_owned(),
        })?;
        let rest = &search[at + key.len()..];
        // the key must be followed directly by an opening paren and preceded
        // by a non-identifier character, else we matched a substring
        let standalone = at == 0
            || !search[..at]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_alphanumeric() || c == '_');
        if standalone {
            if let Some(rest) = rest.trim_start().strip_prefix('(') {
                let end = rest.find(')').ok_or(ParseError::MissingField {
                    line_no,
                    field: key.trim().to_owned(),
                })?;
                return Ok(&rest[..end]);
            }
        }
        search = rest;
        if search.is_empty() {
            return Err(ParseError::MissingField {
                line_no,
                field: key.trim().to_owned(),
            });
        }
    }
}

fn parse_field<T: std::str::FromStr>(
    line: &str,
    key: &str,
    line_no: usize,
) -> Result<T, ParseError> {
    let raw = field(line, key, line_no)?;
    raw.trim().parse().map_err(|_| ParseError::BadValue {
        line_no,
        field: key.trim().to_owned(),
        value: raw.to_owned(),
    })
}

fn parse_value<T: std::str::FromStr>(raw: &str, line_no: usize) -> Result<T, ParseError> {
    raw.trim().parse().map_err(|_| ParseError::BadValue {
        line_no,
        field: "value".to_owned(),
        value: raw.to_owned(),
    })
}

/// Parses `prefixN:` at the start of a line, returning `N`.
fn indexed_prefix(line: &str, prefix: &str, line_no: usize) -> Result<usize, ParseError> {
    line.strip_prefix(prefix)
        .and_then(|rest| rest.split_once(':'))
        .and_then(|(index, _)| index.parse().ok())
        .ok_or_else(|| ParseError::UnexpectedLine {
            line_no,
            line: line.to_owned(),
        })
}

/// Parses an `N: rest` entry line, returning `(N, rest)`.
fn numbered_entry<'a>(line: &'a str, line_no: usize) -> Result<(usize, &'a str), ParseError> {
    line.split_once(':')
        .and_then(|(index, rest)| Some((index.trim().parse().ok()?, rest)))
        .ok_or_else(|| ParseError::UnexpectedLine {
            line_no,
            line: line.to_owned(),
        })
}

fn header_count(rest: &str, line_no: usize) -> Result<usize, ParseError> {
    rest.trim_end_matches(')')
        .trim()
        .parse()
        .map_err(|_| ParseError::BadValue {
            line_no,
            field: "count".to_owned(),
            value: rest.to_owned(),
        })
}

fn header_pair(rest: &str, line_no: usize) -> Result<(usize, usize), ParseError> {
    let raw = rest.trim_end_matches(')');
    let parsed: Option<(usize, usize)> = (|| {
        let (a, b) = raw.split_once(',')?;
        Some((a.trim().parse().ok()?, b.trim().parse().ok()?))
    })();
    parsed.ok_or_else(|| ParseError::BadValue {
        line_no,
        field: "header".to_owned(),
        value: raw.to_owned(),
    })
}

fn header_triple(rest: &str, line_no: usize) -> Result<(usize, usize, usize), ParseError> {
    let raw = rest.trim_end_matches(')');
    let parsed: Option<(usize, usize, usize)> = (|| {
        let mut parts = raw.split(',');
        let a = parts.next()?.trim().parse().ok()?;
        let b = parts.next()?.trim().parse().ok()?;
        let c = parts.next()?.trim().parse().ok()?;
        Some((a, b, c))
    })();
    parsed.ok_or_else(|| ParseError::BadValue {
        line_no,
        field: "header".to_owned(),
        value: raw.to_owned(),
    })
}

/// Reasons a routing-structs dump fails to parse.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// A line does not fit the expected shape.
    #[error("unexpected line {line_no}: {line}")]
    UnexpectedLine {
        /// 1-based line number.
        line_no: usize,
        /// The offending line.
        line: String,
    },

    /// A section marker was expected.
    #[error("expected '{marker}' at line {line_no}, got: {line}")]
    ExpectedMarker {
        /// 1-based line number.
        line_no: usize,
        /// The expected marker.
        marker: &'static str,
        /// The offending line.
        line: String,
    },

    /// A `key(value)` field is missing.
    #[error("line {line_no}: missing field '{field}'")]
    MissingField {
        /// 1-based line number.
        line_no: usize,
        /// The missing field.
        field: String,
    },

    /// A field value failed to parse.
    #[error("line {line_no}: bad value '{value}' for field '{field}'")]
    BadValue {
        /// 1-based line number.
        line_no: usize,
        /// The field.
        field: String,
        /// The raw value.
        value: String,
    },

    /// Indices must appear in strictly ascending order.
    #[error("line {line_no}: {what} indices must be in ascending order")]
    OutOfOrder {
        /// 1-based line number.
        line_no: usize,
        /// What was out of order.
        what: &'static str,
    },

    /// Unknown rr node kind.
    #[error("line {line_no}: unknown rr_type '{kind}'")]
    UnknownNodeKind {
        /// 1-based line number.
        line_no: usize,
        /// The unrecognized kind.
        kind: String,
    },

    /// Unknown pin kind code.
    #[error("line {line_no}: unknown pin_type code {code}")]
    BadPinKind {
        /// 1-based line number.
        line_no: usize,
        /// The unrecognized code.
        code: i32,
    },

    /// A node spans multiple tiles in both axes.
    #[error("line {line_no}: node {index} spans multiple tiles in both axes")]
    BothSpans {
        /// 1-based line number.
        line_no: usize,
        /// Node index.
        index: usize,
    },

    /// A declared count disagrees with the entries found.
    #[error("expected {expected} {what} (line {line_no})")]
    CountMismatch {
        /// 1-based line number (0 when detected at section end).
        line_no: usize,
        /// What was counted.
        what: &'static str,
        /// The declared count.
        expected: usize,
    },

    /// The node-indices header declares the wrong number of node kinds.
    #[error("line {line_no}: expected {expected} node kinds, file declares {found}")]
    KindCountMismatch {
        /// 1-based line number.
        line_no: usize,
        /// Expected kind count.
        expected: usize,
        /// Declared kind count.
        found: usize,
    },

    /// An edge refers to an undeclared node.
    #[error("edge target {target} exceeds declared node count {num_nodes}")]
    EdgeOutOfRange {
        /// The out-of-range target.
        target: usize,
        /// Number of declared nodes.
        num_nodes: usize,
    },

    /// A section that the structs mode does not allow.
    #[error("line {line_no}: section not allowed in this structs mode: {section}")]
    SectionNotAllowed {
        /// 1-based line number.
        line_no: usize,
        /// The section header.
        section: String,
    },

    /// The file ended inside a section.
    #[error("unexpected end of file")]
    UnexpectedEof,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE_DUMP: &str = "\
.rr_node(6)
 node_0: rr_type(SOURCE) xlow(1) xhigh(1) ylow(1) yhigh(1) ptc_num(0) fan_in(0) direction(2) R(0) C(0)
  .edges(1)
   0: edge(1) switch(0)
  .end edges
 node_1: rr_type(OPIN) xlow(1) xhigh(1) ylow(1) yhigh(1) ptc_num(0) fan_in(1) direction(2) R(0) C(0)
  .edges(1)
   0: edge(2) switch(0)
  .end edges
 node_2: rr_type(CHANX) xlow(1) xhigh(2) ylow(1) yhigh(1) ptc_num(0) fan_in(1) direction(0) R(1.5) C(2e-14)
  .edges(1)
   0: edge(3) switch(0)
  .end edges
 node_3: rr_type(CHANX) xlow(2) xhigh(3) ylow(1) yhigh(1) ptc_num(1) fan_in(1) direction(0) R(1.5) C(2e-14)
  .edges(1)
   0: edge(4) switch(0)
  .end edges
 node_4: rr_type(IPIN) xlow(3) xhigh(3) ylow(1) yhigh(1) ptc_num(1) fan_in(1) direction(2) R(0) C(0)
  .edges(1)
   0: edge(5) switch(0)
  .end edges
 node_5: rr_type(SINK) xlow(3) xhigh(3) ylow(1) yhigh(1) ptc_num(1) fan_in(1) direction(2) R(0) C(0)
  .edges(0)
  .end edges
.end rr_node
";

    #[test]
    fn simple_dump_parses() -> anyhow::Result<()> {
        let (_, graph) = parse_str(SIMPLE_DUMP, StructsMode::Simple)?;
        assert_eq!(graph.num_nodes(), 6);
        let chan = &graph[NodeId::new(2)];
        assert_eq!(chan.kind(), NodeKind::ChanX);
        assert_eq!(chan.xlow(), 1);
        assert_eq!(chan.xhigh(), 2);
        assert_eq!(chan.span(), 2);
        assert_eq!(chan.out_edges(), &[NodeId::new(3)]);
        let sink = &graph[NodeId::new(5)];
        assert_eq!(sink.kind(), NodeKind::Sink);
        assert_eq!(sink.ptc(), 1);
        assert!(sink.out_edges().is_empty());
        Ok(())
    }

    #[test]
    fn switch_section_rejected_in_simple_mode() {
        let input = format!("{SIMPLE_DUMP}\n.rr_switch(1)\n.end rr_switch\n");
        let res = parse_str(&input, StructsMode::Simple);
        assert!(matches!(res, Err(ParseError::SectionNotAllowed { .. })));
    }

    #[test]
    fn out_of_order_nodes_fail() {
        let input = "\
.rr_node(2)
 node_1: rr_type(SOURCE) xlow(1) xhigh(1) ylow(1) yhigh(1) ptc_num(0) fan_in(0) direction(2) R(0) C(0)
  .edges(0)
  .end edges
.end rr_node
";
        let res = parse_str(input, StructsMode::Simple);
        assert!(matches!(
            res,
            Err(ParseError::OutOfOrder { what: "rr node", .. })
        ));
    }

    #[test]
    fn dangling_edge_fails() {
        let input = "\
.rr_node(1)
 node_0: rr_type(SOURCE) xlow(1) xhigh(1) ylow(1) yhigh(1) ptc_num(0) fan_in(0) direction(2) R(0) C(0)
  .edges(1)
   0: edge(7) switch(0)
  .end edges
.end rr_node
";
        let res = parse_str(input, StructsMode::Simple);
        assert!(matches!(
            res,
            Err(ParseError::EdgeOutOfRange { target: 7, .. })
        ));
    }

    #[test]
    fn node_counts_snapshot() -> anyhow::Result<()> {
        let (_, graph) = parse_str(SIMPLE_DUMP, StructsMode::Simple)?;
        let kinds = graph
            .nodes()
            .filter(|n| n.kind().is_routing())
            .count();
        insta::assert_yaml_snapshot!((graph.num_nodes(), kinds), @r###"
        ---
        - 6
        - 2
        "###);
        Ok(())
    }
}
