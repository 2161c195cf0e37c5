//! Plain-text inventory tables for the log

use std::fmt;

use crate::types::{HaGroup, Node};

/// Left-aligned table with a header rule
fn write_table(f: &mut fmt::Formatter<'_>, headers: &[&str], rows: &[Vec<String>]) -> fmt::Result {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    let write_row = |f: &mut fmt::Formatter<'_>, cells: &[String]| -> fmt::Result {
        let line = cells
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{:<width$}", cell, width = width))
            .collect::<Vec<_>>()
            .join(" | ");
        writeln!(f, "{}", line.trim_end())
    };

    let header: Vec<String> = headers.iter().map(|h| h.to_string()).collect();
    write_row(f, &header)?;
    let rule = widths
        .iter()
        .map(|w| "-".repeat(*w))
        .collect::<Vec<_>>()
        .join("-+-");
    writeln!(f, "{}", rule)?;
    for row in rows {
        write_row(f, row)?;
    }
    Ok(())
}

/// Nodes with their status and running VMs
pub struct NodeTable<'a>(pub &'a [Node]);

impl fmt::Display for NodeTable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rows: Vec<Vec<String>> = self
            .0
            .iter()
            .map(|node| {
                vec![
                    node.node.clone(),
                    node.status.to_string(),
                    node.running_vms
                        .iter()
                        .map(|vm| vm.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", "),
                ]
            })
            .collect();
        write_table(f, &["Node", "Status", "Running VMs"], &rows)
    }
}

/// Groups with their nodes and assigned VMs
pub struct GroupTable<'a>(pub &'a [HaGroup]);

impl fmt::Display for GroupTable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rows: Vec<Vec<String>> = self
            .0
            .iter()
            .map(|group| {
                vec![
                    group.name.clone(),
                    group.members.to_string(),
                    group
                        .vms
                        .iter()
                        .map(|vm| vm.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", "),
                ]
            })
            .collect();
        write_table(f, &["Group", "Nodes", "VMs"], &rows)
    }
}
