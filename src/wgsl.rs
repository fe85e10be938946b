//! WGSL dependency resolution (§4.4).
//!
//! Given a root WGSL-module id, walks its dependency DAG with an
//! iterative depth-first traversal and concatenates the referenced
//! data-section blobs, dependencies first, into one shader source string.

use crate::error::CoreError;
use crate::module::{Module, MAX_WGSL_DEPS, MAX_WGSL_MODULES};

const TRAVERSAL_CAP: usize = MAX_WGSL_MODULES * MAX_WGSL_DEPS;

/// Resolve the final WGSL source for `root`, inlining all transitive
/// dependencies before the root's own source.
pub fn resolve(module: &Module, root: u32) -> Result<String, CoreError> {
    if module.wgsl(root).is_none() {
        return Err(CoreError::UnknownWgslModule { wgsl_id: root });
    }

    let mut order = Vec::new();
    // `done` dedupes completed nodes (the diamond case); `on_stack` tracks
    // the active DFS path so a dependency pointing back into it is a true
    // cycle, not a revisit.
    let mut done = std::collections::HashSet::new();
    let mut on_stack = std::collections::HashSet::new();
    // (id, next_dep_index) stack frames for the iterative DFS.
    let mut stack: Vec<(u32, usize)> = vec![(root, 0)];
    on_stack.insert(root);
    let mut iterations = 0usize;

    while let Some(&mut (id, ref mut next_dep)) = stack.last_mut() {
        iterations += 1;
        if iterations > TRAVERSAL_CAP {
            return Err(CoreError::DependencyDepthExceeded);
        }

        let entry = match module.wgsl(id) {
            Some(entry) => entry,
            None => {
                // Missing transitive dependencies are tolerated (§4.4): pop
                // without emitting. The root itself was checked up front.
                on_stack.remove(&id);
                stack.pop();
                continue;
            }
        };

        if *next_dep < entry.deps.len() {
            let dep = entry.deps[*next_dep] as u32;
            *next_dep += 1;
            if done.contains(&dep) {
                continue;
            }
            if !on_stack.insert(dep) {
                return Err(CoreError::DependencyDepthExceeded);
            }
            stack.push((dep, 0));
            continue;
        }

        on_stack.remove(&id);
        done.insert(id);
        order.push(id);
        stack.pop();
    }

    let mut pieces = Vec::with_capacity(order.len());
    for id in order {
        if let Some(entry) = module.wgsl(id) {
            if let Some(blob) = module.data(entry.data_id as u32) {
                pieces.push(String::from_utf8_lossy(blob).into_owned());
            }
        }
    }

    Ok(pieces.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{Module, WgslEntry};

    // Build a Module by hand via the encode/decode path so tests exercise
    // the same container format the loader parses.
    fn module_with_wgsl(sources: &[&str], graph: &[(u16, &[u16])]) -> Module {
        let data: Vec<Vec<u8>> = sources.iter().map(|s| s.as_bytes().to_vec()).collect();
        let wgsl: Vec<WgslEntry> = graph
            .iter()
            .map(|(data_id, deps)| WgslEntry {
                data_id: *data_id,
                deps: deps.to_vec(),
            })
            .collect();
        build_module(data, wgsl)
    }

    fn build_module(data: Vec<Vec<u8>>, wgsl: Vec<WgslEntry>) -> Module {
        use crate::module::{MAGIC, SUPPORTED_VERSION};
        const HEADER_LEN: usize = 28;

        let mut strings = Vec::new();
        strings.extend_from_slice(&0u32.to_le_bytes());

        let mut data_section = Vec::new();
        data_section.extend_from_slice(&(data.len() as u32).to_le_bytes());
        for d in &data {
            data_section.extend_from_slice(&(d.len() as u32).to_le_bytes());
            data_section.extend_from_slice(d);
        }

        let mut wgsl_section = Vec::new();
        wgsl_section.extend_from_slice(&(wgsl.len() as u32).to_le_bytes());
        for entry in &wgsl {
            wgsl_section.extend_from_slice(&entry.data_id.to_le_bytes());
            wgsl_section.push(entry.deps.len() as u8);
            for dep in &entry.deps {
                wgsl_section.extend_from_slice(&dep.to_le_bytes());
            }
        }

        let strings_offset = HEADER_LEN as u32;
        let data_offset = strings_offset + strings.len() as u32;
        let wgsl_offset = data_offset + data_section.len() as u32;
        let bytecode_offset = wgsl_offset + wgsl_section.len() as u32;
        let end_offset = bytecode_offset;

        let mut out = Vec::new();
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&SUPPORTED_VERSION.to_le_bytes());
        out.push(0b0011_1111);
        out.push(0);
        out.extend_from_slice(&strings_offset.to_le_bytes());
        out.extend_from_slice(&data_offset.to_le_bytes());
        out.extend_from_slice(&wgsl_offset.to_le_bytes());
        out.extend_from_slice(&bytecode_offset.to_le_bytes());
        out.extend_from_slice(&end_offset.to_le_bytes());
        out.extend_from_slice(&strings);
        out.extend_from_slice(&data_section);
        out.extend_from_slice(&wgsl_section);

        Module::load(&out).unwrap()
    }

    #[test]
    fn dependencies_precede_dependent_in_output() {
        // wgsl[0] = "fn util() {}" (no deps)
        // wgsl[1] = "fn main() { util(); }" depends on wgsl[0]
        let module = module_with_wgsl(
            &["fn util() {}", "fn main() { util(); }"],
            &[(0, &[]), (1, &[0])],
        );
        let resolved = resolve(&module, 1).unwrap();
        let util_pos = resolved.find("fn util").unwrap();
        let main_pos = resolved.find("fn main").unwrap();
        assert!(util_pos < main_pos);
    }

    #[test]
    fn deduplicates_diamond_dependency() {
        // root(2) -> {0, 1}, 0 -> base(3)? build: base(2), mid_a(1)->base, mid_b... simpler diamond:
        // 0: base, 1: dep on 0, 2: dep on 0, 3 (root): dep on [1,2]
        let module = module_with_wgsl(
            &["base", "mid_a", "mid_b", "root"],
            &[(0, &[]), (1, &[0]), (2, &[0]), (3, &[1, 2])],
        );
        let resolved = resolve(&module, 3).unwrap();
        assert_eq!(resolved.matches("base").count(), 1);
    }

    #[test]
    fn missing_dependency_is_skipped_not_fatal() {
        let module = module_with_wgsl(&["root"], &[(0, &[9])]);
        let resolved = resolve(&module, 0).unwrap();
        assert_eq!(resolved, "root");
    }

    #[test]
    fn cycle_raises_dependency_depth_exceeded() {
        let module = module_with_wgsl(&["a", "b"], &[(0, &[1]), (1, &[0])]);
        let err = resolve(&module, 0).unwrap_err();
        assert!(matches!(err, CoreError::DependencyDepthExceeded));
    }

    #[test]
    fn missing_root_is_an_error_not_empty_output() {
        let module = module_with_wgsl(&["a"], &[(0, &[])]);
        let err = resolve(&module, 9).unwrap_err();
        assert!(matches!(err, CoreError::UnknownWgslModule { wgsl_id: 9 }));
    }
}
