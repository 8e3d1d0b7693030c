//! Structural and type validation run before code generation.
//!
//! Each violation is appended to the result with a stable code and a JSON
//! context naming the offending nodes and ports; validation never stops at
//! the first problem.

use std::collections::{HashMap, HashSet, VecDeque};

use serde_json::json;
use uuid::Uuid;

use crate::diagnostics::Diagnostics;
use crate::graph_function::GraphFunction;
use crate::graph_module::GraphModule;
use crate::node_type::port_pairs;

/// Validate one function. Checks, in order: connection symmetry, entry and
/// exit signatures, execution and pure cycles, and (when the graph is
/// acyclic) data availability along every execution path.
pub fn validate_function(module: &GraphModule, func: &GraphFunction) -> Diagnostics {
    let mut res = Diagnostics::new();
    res.add_context(json!({
        "function": func.name(),
        "module": module.full_name(),
    }));

    res.append(validate_connections_are_two_way(func));
    res.append(validate_entry_type(func));
    res.append(validate_exit_types(func));

    let cycles = validate_cycles(func);
    let had_cycles = !cycles.success();
    res.append(cycles);

    // The path walk recurses along exec edges; only run it on acyclic graphs.
    if !had_cycles {
        res.append(validate_node_inputs(func));
        res.append(validate_exec_outputs(func));
    }

    if func.name() == "main" && module.short_name() == "main" {
        res.append(validate_main_signature(func));
    }

    res
}

/// Every stored edge must have its dual record on the peer node.
fn validate_connections_are_two_way(func: &GraphFunction) -> Diagnostics {
    let mut res = Diagnostics::new();

    for node in func.nodes().values() {
        for (idx, conn) in node.input_data_connections().iter().enumerate() {
            let Some((peer, peer_idx)) = conn else {
                continue;
            };
            let connects_back = func
                .node(*peer)
                .and_then(|p| p.output_data_connections().get(*peer_idx))
                .is_some_and(|slot| slot.contains(&(node.id(), idx)));
            if !connects_back {
                res.add_entry(
                    "EUKN",
                    "Data connection doesn't connect back",
                    json!({
                        "Left Node": peer.to_string(),
                        "Right Node": node.string_id(),
                        "Right input ID": idx,
                    }),
                );
                continue;
            }

            let producer = &func.nodes()[peer];
            let from_ty = &producer.node_type().data_outputs[*peer_idx].ty;
            let to_ty = &node.node_type().data_inputs[idx].ty;
            if from_ty != to_ty {
                res.add_entry(
                    "E24",
                    "Data edge connects ports of different types",
                    json!({
                        "Left Hand Type": from_ty.qualified_name(),
                        "Right Hand Type": to_ty.qualified_name(),
                        "Left Node": peer.to_string(),
                        "Right Node": node.string_id(),
                    }),
                );
            }
        }

        for (idx, slot) in node.output_data_connections().iter().enumerate() {
            for (peer, peer_idx) in slot {
                let connects_back = func
                    .node(*peer)
                    .and_then(|p| p.input_data_connections().get(*peer_idx))
                    .is_some_and(|conn| *conn == Some((node.id(), idx)));
                if !connects_back {
                    res.add_entry(
                        "EUKN",
                        "Data connection doesn't connect back",
                        json!({
                            "Left Node": node.string_id(),
                            "Right Node": peer.to_string(),
                            "Right input ID": peer_idx,
                        }),
                    );
                }
            }
        }

        for (idx, slot) in node.input_exec_connections().iter().enumerate() {
            for (peer, peer_idx) in slot {
                let connects_back = func
                    .node(*peer)
                    .and_then(|p| p.output_exec_connections().get(*peer_idx))
                    .is_some_and(|conn| *conn == Some((node.id(), idx)));
                if !connects_back {
                    res.add_entry(
                        "EUKN",
                        "Exec connection doesn't connect back",
                        json!({
                            "Left Node": peer.to_string(),
                            "Right Node": node.string_id(),
                            "Right input ID": idx,
                        }),
                    );
                }
            }
        }

        for (idx, conn) in node.output_exec_connections().iter().enumerate() {
            let Some((peer, peer_idx)) = conn else {
                continue;
            };
            let connects_back = func
                .node(*peer)
                .and_then(|p| p.input_exec_connections().get(*peer_idx))
                .is_some_and(|slot| slot.contains(&(node.id(), idx)));
            if !connects_back {
                res.add_entry(
                    "EUKN",
                    "Exec connection doesn't connect back",
                    json!({
                        "Left Node": node.string_id(),
                        "Left output ID": idx,
                        "Right Node": peer.to_string(),
                    }),
                );
            }
        }
    }

    res
}

fn validate_entry_type(func: &GraphFunction) -> Diagnostics {
    let mut res = Diagnostics::new();

    let entries = func.nodes_with_type("lang", "entry");
    match entries.len() {
        0 => {
            res.add_entry("E01", "No entry node", json!({}));
            return res;
        }
        1 => {}
        n => {
            res.add_entry(
                "EUKN",
                "Function must have exactly one entry node",
                json!({ "Entry Count": n }),
            );
            return res;
        }
    }

    let entry = &func.nodes()[&entries[0]];
    if entry.node_type().data_outputs != func.data_inputs() {
        res.add_entry(
            "EUKN",
            "Inputs to function don't match entry node",
            json!({
                "Function Inputs": port_pairs(func.data_inputs()),
                "Entry Inputs": port_pairs(&entry.node_type().data_outputs),
            }),
        );
    }
    if entry.node_type().exec_outputs != func.exec_inputs() {
        res.add_entry(
            "EUKN",
            "Exec inputs to function don't match entry node",
            json!({
                "Function Exec Inputs": func.exec_inputs(),
                "Entry Exec Outputs": entry.node_type().exec_outputs,
            }),
        );
    }
    if func.exec_inputs().is_empty() {
        res.add_entry(
            "EUKN",
            "Function must have at least one exec input",
            json!({}),
        );
    }

    res
}

fn validate_exit_types(func: &GraphFunction) -> Diagnostics {
    let mut res = Diagnostics::new();

    let exits = func.nodes_with_type("lang", "exit");
    if exits.is_empty() {
        res.add_entry(
            "EUKN",
            "Function must have at least one exit node",
            json!({}),
        );
        return res;
    }

    for id in exits {
        let exit = &func.nodes()[&id];
        if exit.node_type().data_inputs != func.data_outputs() {
            res.add_entry(
                "EUKN",
                "Outputs of function don't match exit node",
                json!({
                    "Function Outputs": port_pairs(func.data_outputs()),
                    "Exit Inputs": port_pairs(&exit.node_type().data_inputs),
                    "Node ID": id.to_string(),
                }),
            );
        }
        if exit.node_type().exec_inputs != func.exec_outputs() {
            res.add_entry(
                "EUKN",
                "Exec outputs of function don't match exit node",
                json!({
                    "Function Exec Outputs": func.exec_outputs(),
                    "Exit Exec Inputs": exit.node_type().exec_inputs,
                    "Node ID": id.to_string(),
                }),
            );
        }
    }

    res
}

/// Reject execution cycles (`E26`) and cycles among pure nodes (`E25`).
fn validate_cycles(func: &GraphFunction) -> Diagnostics {
    let mut res = Diagnostics::new();

    // Exec cycles: DFS over output exec edges from every node so detached
    // subgraphs are covered too.
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        White,
        Gray,
        Black,
    }

    let mut marks: HashMap<Uuid, Mark> = func.nodes().keys().map(|id| (*id, Mark::White)).collect();
    let mut order: Vec<Uuid> = func.nodes().keys().copied().collect();
    order.sort();

    fn dfs_exec(
        func: &GraphFunction,
        id: Uuid,
        marks: &mut HashMap<Uuid, Mark>,
        res: &mut Diagnostics,
    ) {
        marks.insert(id, Mark::Gray);
        for conn in func.nodes()[&id].output_exec_connections().iter().flatten() {
            match marks[&conn.0] {
                Mark::Gray => {
                    res.add_entry(
                        "E26",
                        "Execution cycle in function",
                        json!({ "Node ID": conn.0.to_string() }),
                    );
                }
                Mark::White => dfs_exec(func, conn.0, marks, res),
                Mark::Black => {}
            }
        }
        marks.insert(id, Mark::Black);
    }

    for id in &order {
        if marks[id] == Mark::White {
            dfs_exec(func, *id, &mut marks, &mut res);
        }
    }

    // Pure cycles: DFS over input data edges restricted to pure nodes.
    let mut pure_marks: HashMap<Uuid, Mark> = func
        .nodes()
        .iter()
        .filter(|(_, n)| n.node_type().pure)
        .map(|(id, _)| (*id, Mark::White))
        .collect();

    fn dfs_pure(
        func: &GraphFunction,
        id: Uuid,
        marks: &mut HashMap<Uuid, Mark>,
        res: &mut Diagnostics,
    ) {
        marks.insert(id, Mark::Gray);
        for conn in func.nodes()[&id].input_data_connections().iter().flatten() {
            if !func.nodes()[&conn.0].node_type().pure {
                continue;
            }
            match marks[&conn.0] {
                Mark::Gray => {
                    res.add_entry(
                        "E25",
                        "Cycle among pure nodes",
                        json!({ "Node ID": conn.0.to_string() }),
                    );
                }
                Mark::White => dfs_pure(func, conn.0, marks, res),
                Mark::Black => {}
            }
        }
        marks.insert(id, Mark::Black);
    }

    for id in order {
        if pure_marks.get(&id) == Some(&Mark::White) {
            dfs_pure(func, id, &mut pure_marks, &mut res);
        }
    }

    res
}

/// Walk every execution path from the entry node, checking that each
/// visited node's data inputs are connected (`E27`, including the inputs of
/// the pure nodes feeding it) and that non-pure producers have already
/// executed on that path (`E28`).
fn validate_node_inputs(func: &GraphFunction) -> Diagnostics {
    let mut res = Diagnostics::new();

    let Some(entry) = func.entry_node() else {
        return res;
    };

    let mut already_called: HashMap<Uuid, Vec<usize>> = HashMap::new();
    already_called.insert(entry, vec![]);

    for conn in func.nodes()[&entry]
        .output_exec_connections()
        .iter()
        .flatten()
    {
        validate_path(func, conn.0, conn.1, already_called.clone(), &mut res);
    }

    res
}

fn validate_path(
    func: &GraphFunction,
    id: Uuid,
    in_exec_id: usize,
    mut already_called: HashMap<Uuid, Vec<usize>>,
    res: &mut Diagnostics,
) {
    if already_called
        .get(&id)
        .is_some_and(|ids| ids.contains(&in_exec_id))
    {
        return;
    }

    check_inputs_available(func, id, &already_called, &mut HashSet::new(), res);

    already_called.entry(id).or_default().push(in_exec_id);

    for conn in func.nodes()[&id].output_exec_connections().iter().flatten() {
        validate_path(func, conn.0, conn.1, already_called.clone(), res);
    }
}

fn check_inputs_available(
    func: &GraphFunction,
    id: Uuid,
    already_called: &HashMap<Uuid, Vec<usize>>,
    visited_pures: &mut HashSet<Uuid>,
    res: &mut Diagnostics,
) {
    let node = &func.nodes()[&id];
    for (idx, conn) in node.input_data_connections().iter().enumerate() {
        let Some((producer, _)) = conn else {
            res.add_entry(
                "E27",
                "Node is missing an input data connection",
                json!({
                    "Node ID": node.string_id(),
                    "dataid": idx,
                    "nodetype": node.node_type().qualified_name(),
                }),
            );
            continue;
        };

        let producer_node = &func.nodes()[producer];
        if producer_node.node_type().pure {
            // Pure producers are re-materialised on demand, but their own
            // inputs must still be satisfied.
            if visited_pures.insert(*producer) {
                check_inputs_available(func, *producer, already_called, visited_pures, res);
            }
        } else if !already_called.contains_key(producer) {
            res.add_entry(
                "E28",
                "Node is fed data by a node that has not yet executed",
                json!({
                    "Node ID": node.string_id(),
                    "Producer Node ID": producer.to_string(),
                }),
            );
        }
    }
}

/// Every exec-reachable node must have all of its exec outputs connected.
fn validate_exec_outputs(func: &GraphFunction) -> Diagnostics {
    let mut res = Diagnostics::new();

    let Some(entry) = func.entry_node() else {
        return res;
    };

    let mut reachable: HashSet<Uuid> = HashSet::new();
    let mut queue = VecDeque::from([entry]);
    while let Some(id) = queue.pop_front() {
        if !reachable.insert(id) {
            continue;
        }
        for conn in func.nodes()[&id].output_exec_connections().iter().flatten() {
            queue.push_back(conn.0);
        }
    }

    let mut ordered: Vec<Uuid> = reachable.into_iter().collect();
    ordered.sort();
    for id in ordered {
        let node = &func.nodes()[&id];
        for (idx, conn) in node.output_exec_connections().iter().enumerate() {
            if conn.is_none() {
                res.add_entry(
                    "E29",
                    "Node is missing an output exec connection",
                    json!({ "Node ID": node.string_id(), "Missing ID": idx }),
                );
            }
        }
    }

    res
}

/// `main` in a `main` module is callable from the synthesized C `main`: one
/// exec in, one exec out, no data inputs, exactly one `lang:i32` output.
fn validate_main_signature(func: &GraphFunction) -> Diagnostics {
    let mut res = Diagnostics::new();

    if func.exec_inputs().len() != 1 {
        res.add_entry(
            "EUKN",
            "A main function must have exactly one exec in",
            json!({ "Exec Inputs": func.exec_inputs() }),
        );
    }
    if func.exec_outputs().len() != 1 {
        res.add_entry(
            "EUKN",
            "A main function must have exactly one exec out",
            json!({ "Exec Outputs": func.exec_outputs() }),
        );
    }
    if !func.data_inputs().is_empty() {
        res.add_entry(
            "EUKN",
            "A main function must have no data inputs",
            json!({ "Data Inputs": port_pairs(func.data_inputs()) }),
        );
    }
    let output_ok = func.data_outputs().len() == 1
        && func.data_outputs()[0].ty.qualified_name() == "lang:i32";
    if !output_ok {
        res.add_entry(
            "EUKN",
            "A main function must have exactly one data output that's a lang:i32",
            json!({ "Data Outputs": port_pairs(func.data_outputs()) }),
        );
    }

    res
}
