use crate::graph::{Graph, Handle, NodeId, NodeSide};
use crate::vcf::open_text;
use std::io::{self, BufRead, Write};

fn invalid(line_number: usize, msg: impl std::fmt::Display) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("GFA line {}: {}", line_number, msg),
    )
}

fn parse_id(field: &str, line_number: usize) -> io::Result<NodeId> {
    match field.parse::<NodeId>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(invalid(
            line_number,
            format!("segment name '{}' is not a positive integer", field),
        )),
    }
}

fn parse_orientation(field: &str, line_number: usize) -> io::Result<bool> {
    match field {
        "+" => Ok(false),
        "-" => Ok(true),
        _ => Err(invalid(line_number, format!("bad orientation '{}'", field))),
    }
}

/// Parse a `P` line step such as `12+`.
fn parse_step(step: &str, line_number: usize) -> io::Result<Handle> {
    let (id, is_reverse) = if let Some(id) = step.strip_suffix('+') {
        (id, false)
    } else if let Some(id) = step.strip_suffix('-') {
        (id, true)
    } else {
        return Err(invalid(line_number, format!("bad path step '{}'", step)));
    };
    Ok(Handle::new(parse_id(id, line_number)?, is_reverse))
}

/// Read a GFA 1.0 graph. Only `S`, `L` and `P` records are used; links must
/// have no overlap.
pub fn read_gfa<R: BufRead>(reader: R) -> io::Result<Graph> {
    let mut graph = Graph::new();
    let mut links: Vec<(Handle, Handle, usize)> = Vec::new();
    let mut paths: Vec<(String, Vec<Handle>, usize)> = Vec::new();

    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let line_number = i + 1;
        let fields: Vec<&str> = line.split('\t').collect();
        match fields[0] {
            "S" => {
                if fields.len() < 3 {
                    return Err(invalid(line_number, "segment needs a name and a sequence"));
                }
                let id = parse_id(fields[1], line_number)?;
                if fields[2] == "*" {
                    return Err(invalid(line_number, "segment without sequence"));
                }
                graph
                    .create_node_with_id(id, fields[2].to_ascii_uppercase().into_bytes())
                    .map_err(|e| invalid(line_number, e))?;
            }
            "L" => {
                if fields.len() < 5 {
                    return Err(invalid(line_number, "link needs 5 columns"));
                }
                if let Some(&overlap) = fields.get(5) {
                    if overlap != "*" && overlap != "0M" {
                        return Err(invalid(
                            line_number,
                            format!("overlapping links are not supported ({})", overlap),
                        ));
                    }
                }
                let from = Handle::new(
                    parse_id(fields[1], line_number)?,
                    parse_orientation(fields[2], line_number)?,
                );
                let to = Handle::new(
                    parse_id(fields[3], line_number)?,
                    parse_orientation(fields[4], line_number)?,
                );
                links.push((from, to, line_number));
            }
            "P" => {
                if fields.len() < 3 {
                    return Err(invalid(line_number, "path needs a name and steps"));
                }
                let steps = fields[2]
                    .split(',')
                    .map(|step| parse_step(step, line_number))
                    .collect::<io::Result<Vec<_>>>()?;
                paths.push((fields[1].to_string(), steps, line_number));
            }
            _ => {}
        }
    }

    // Links and paths may precede the segments they name
    for (from, to, line_number) in links {
        for node in [from.node, to.node] {
            if !graph.has_node(node) {
                return Err(invalid(line_number, format!("unknown segment {}", node)));
            }
        }
        graph.connect(from, to);
    }
    for (name, steps, line_number) in paths {
        if let Some(step) = steps.iter().find(|s| !graph.has_node(s.node)) {
            return Err(invalid(line_number, format!("unknown segment {}", step.node)));
        }
        if graph.has_path(&name) {
            return Err(invalid(line_number, format!("duplicate path '{}'", name)));
        }
        graph.add_path(&name, steps);
    }

    Ok(graph)
}

/// Read a plain or BGZF-compressed GFA file.
pub fn read_gfa_file(path: &str) -> io::Result<Graph> {
    read_gfa(open_text(path)?)
}

fn orientation(handle: Handle) -> char {
    if handle.is_reverse {
        '-'
    } else {
        '+'
    }
}

/// The walk an edge between two sides describes, preferring forward handles.
fn edge_walk(a: NodeSide, b: NodeSide) -> (Handle, Handle) {
    let from = a.entering().flip();
    let to = b.entering();
    if from.is_reverse && to.is_reverse {
        (to.flip(), from.flip())
    } else {
        (from, to)
    }
}

/// Write `graph` as GFA 1.0 with segments in id order and paths in natural
/// name order.
pub fn write_gfa<W: Write>(graph: &Graph, writer: &mut W) -> io::Result<()> {
    writeln!(writer, "H\tVN:Z:1.0")?;

    let mut ids: Vec<NodeId> = graph.node_ids().collect();
    ids.sort_unstable();
    for id in ids {
        let sequence = graph.sequence(id).unwrap_or_default();
        writeln!(writer, "S\t{}\t{}", id, String::from_utf8_lossy(sequence))?;
    }

    for (a, b) in graph.edges() {
        let (from, to) = edge_walk(a, b);
        writeln!(
            writer,
            "L\t{}\t{}\t{}\t{}\t0M",
            from.node,
            orientation(from),
            to.node,
            orientation(to)
        )?;
    }

    let mut names: Vec<&str> = graph.path_names().collect();
    names.sort_by(|a, b| natord::compare(a, b));
    for name in names {
        let steps = graph.path(name).unwrap_or_default();
        let walk: Vec<String> = steps
            .iter()
            .map(|h| format!("{}{}", h.node, orientation(*h)))
            .collect();
        let overlaps = vec!["0M"; steps.len().saturating_sub(1)];
        let overlaps = if overlaps.is_empty() {
            "*".to_string()
        } else {
            overlaps.join(",")
        };
        writeln!(writer, "P\t{}\t{}\t{}", name, walk.join(","), overlaps)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const GFA: &str = "H\tVN:Z:1.0\n\
S\t1\tACGT\n\
S\t2\tg\n\
S\t3\tTTA\n\
L\t1\t+\t2\t+\t0M\n\
L\t2\t+\t3\t-\t*\n\
L\t1\t+\t3\t-\t0M\n\
P\tchr10\t1+,2+,3-\t0M,0M\n\
P\tchr2\t3+,1-\t*\n";

    #[test]
    fn test_read_gfa() {
        let graph = read_gfa(Cursor::new(GFA)).unwrap();
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edge_count(), 3);
        assert_eq!(graph.sequence(2), Some(&b"G"[..]));
        assert_eq!(graph.path_sequence("chr10").unwrap(), b"ACGTGTAA".to_vec());
        assert_eq!(graph.path_sequence("chr2").unwrap(), b"TTAACGT".to_vec());
        assert_eq!(
            graph.successors(Handle::forward(2)),
            vec![Handle::new(3, true)]
        );
    }

    #[test]
    fn test_write_orders_paths_naturally() {
        let graph = read_gfa(Cursor::new(GFA)).unwrap();
        let mut out = Vec::new();
        write_gfa(&graph, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let chr2 = text.find("P\tchr2\t").unwrap();
        let chr10 = text.find("P\tchr10\t").unwrap();
        assert!(chr2 < chr10);
        assert!(text.contains("S\t2\tG\n"));
        assert!(text.contains("P\tchr10\t1+,2+,3-\t0M,0M\n"));

        let reread = read_gfa(Cursor::new(text)).unwrap();
        assert_eq!(reread.edges(), graph.edges());
    }

    #[test]
    fn test_reversed_link_is_written_forward() {
        let (from, to) = edge_walk(NodeSide::start(2), NodeSide::end(1));
        assert_eq!((from, to), (Handle::forward(1), Handle::forward(2)));

        let (from, to) = edge_walk(NodeSide::start(1), NodeSide::start(2));
        assert_eq!((from, to), (Handle::new(1, true), Handle::forward(2)));
    }

    #[test]
    fn test_rejects_bad_records() {
        let err = read_gfa(Cursor::new("S\tseg1\tACGT\n")).unwrap_err();
        assert!(err.to_string().contains("line 1"));
        assert!(read_gfa(Cursor::new("S\t1\tA\nS\t2\tC\nL\t1\t+\t2\t+\t3M\n")).is_err());
        assert!(read_gfa(Cursor::new("S\t1\tA\nL\t1\t+\t9\t+\t0M\n")).is_err());
        assert!(read_gfa(Cursor::new("S\t1\tA\nS\t1\tC\n")).is_err());
    }
}
