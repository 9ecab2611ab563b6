//! Service dependency ordering
//!
//! Orders the services of a stack so that every service comes after the
//! services it links to. Traversal is a depth-first search with three marks
//! (unvisited, in progress, done); reaching an in-progress node is a cycle.
//! Names are visited in sorted order, so the result is deterministic.

use std::collections::{BTreeMap, HashMap};

use crate::error::{TaskError, TaskResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

/// Returns every service exactly once, dependencies first
///
/// `links` maps a service name to the names it depends on.
pub fn service_order(links: &BTreeMap<String, Vec<String>>) -> TaskResult<Vec<String>> {
    let mut marks: HashMap<&str, Mark> = HashMap::with_capacity(links.len());
    let mut order = Vec::with_capacity(links.len());
    let mut path = Vec::new();

    for name in links.keys() {
        visit(name, links, &mut marks, &mut path, &mut order)?;
    }

    Ok(order)
}

fn visit<'a>(
    name: &'a str,
    links: &'a BTreeMap<String, Vec<String>>,
    marks: &mut HashMap<&'a str, Mark>,
    path: &mut Vec<&'a str>,
    order: &mut Vec<String>,
) -> TaskResult<()> {
    match marks.get(name) {
        Some(Mark::Done) => return Ok(()),
        Some(Mark::InProgress) => {
            let start = path.iter().position(|n| *n == name).unwrap_or(0);
            let mut cycle: Vec<String> = path[start..].iter().map(|n| n.to_string()).collect();
            cycle.push(name.to_string());
            return Err(TaskError::DependencyCycle(cycle));
        }
        None => {}
    }

    marks.insert(name, Mark::InProgress);
    path.push(name);

    let mut deps: Vec<&String> = links.get(name).map(|d| d.iter().collect()).unwrap_or_default();
    deps.sort();
    deps.dedup();

    for dep in deps {
        let Some((key, _)) = links.get_key_value(dep.as_str()) else {
            return Err(TaskError::UnknownService {
                service: name.to_string(),
                link: dep.clone(),
            });
        };
        visit(key, links, marks, path, order)?;
    }

    path.pop();
    marks.insert(name, Mark::Done);
    order.push(name.to_string());
    Ok(())
}
