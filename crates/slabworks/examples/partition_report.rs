//! Print how a generated mesh is split over a number of processes,
//! without actually running in parallel.
//!
//! `cargo run --example partition_report -- "10x4x13|shell:xZ" 3`

use slabworks as sw;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let mesh_params = args.next().unwrap_or_else(|| "10x4x13|shell:xZ".to_string());
    let processor_count: usize = match args.next() {
        Some(count) => count.parse()?,
        None => 3,
    };
    if processor_count == 0 {
        return Err("need at least one process".into());
    }

    for layout in sw::ProcessorLayout::all(processor_count) {
        let mesh = sw::GeneratedMesh::from_params(&mesh_params, layout)?;
        if layout.is_first() {
            log::info!("\n{mesh}");
        }

        log::info!(
            "rank {}: z intervals {}..{}, {} nodes, {} elements",
            layout.my_processor,
            mesh.my_start_z(),
            mesh.my_start_z() + mesh.my_num_z(),
            mesh.node_count_proc(),
            mesh.element_count_proc(),
        );
        for block in 1..=mesh.block_count() {
            let ids = mesh.block_element_map(block);
            let range = match (ids.first(), ids.last()) {
                (Some(first), Some(last)) => format!("IDs {first}..={last}"),
                _ => "empty".to_string(),
            };
            log::info!(
                "  block {block} ({}): {} of {} elements, {range}",
                mesh.topology(block).name(),
                mesh.block_element_count_proc(block),
                mesh.block_element_count(block),
            );
        }

        let comm_map = mesh.node_communication_map();
        for neighbour in [layout.my_processor.checked_sub(1), Some(layout.my_processor + 1)]
            .into_iter()
            .flatten()
        {
            let shared = comm_map.iter().filter(|&(_, p)| p == neighbour).count();
            if shared > 0 {
                log::info!("  shares {shared} nodes with rank {neighbour}");
            }
        }
    }
    Ok(())
}
