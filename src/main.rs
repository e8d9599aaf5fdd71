use jverify::classfile::{parse_class, ClassFile, FieldAccessFlags, MethodAccessFlags, RenderDescriptor};
use jverify::verifier::{ClassGraph, ClassVerifier, VerifierConfig};

use clap::{App, Arg};
use std::fs;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let matches = App::new("JVM class file verifier")
        .version("0.1.0")
        .about("Verifies the bytecode of compiled JVM classes")
        .arg(
            Arg::with_name("strict")
                .long("strict")
                .help("Never fall back from type checking to type inference"),
        )
        .arg(
            Arg::with_name("INPUT")
                .help("Class files to verify (all of them seed the class hierarchy)")
                .required(true)
                .multiple(true),
        )
        .get_matches();

    let mut config = VerifierConfig::default();
    if matches.is_present("strict") {
        config.legacy_fallback = |_| false;
    }

    let mut classes = vec![];
    let mut graph = ClassGraph::new();
    for path in matches.values_of("INPUT").into_iter().flatten() {
        log::info!("Reading '{}'", path);
        let bytes = fs::read(path)?;
        let class = parse_class(&bytes)?;
        seed_graph(&mut graph, &class);
        classes.push(class);
    }

    let verifier = ClassVerifier::new(&graph, config);
    let mut failures = 0;
    for class in &classes {
        match verifier.verify_class(class) {
            Ok(verified) => {
                log::info!("{}: {} methods verified", class.name, verified.len());
            }
            Err(error) => {
                failures += 1;
                eprintln!("{}: {}", class.name, error);
            }
        }
    }

    if failures > 0 {
        std::process::exit(1);
    }
    Ok(())
}

/// Register a parsed class and its protected members with the hierarchy
fn seed_graph(graph: &mut ClassGraph, class: &ClassFile) {
    graph.add_class(
        class.name.clone(),
        class.superclass.clone(),
        class.interfaces.clone(),
        class
            .access_flags
            .contains(jverify::classfile::ClassAccessFlags::INTERFACE),
    );
    for field in &class.fields {
        if field.access_flags.contains(FieldAccessFlags::PROTECTED) {
            graph.add_protected_member(&class.name, field.name.clone(), field.descriptor.render());
        }
    }
    for method in &class.methods {
        if method.access_flags.contains(MethodAccessFlags::PROTECTED) {
            graph.add_protected_member(
                &class.name,
                method.name.clone(),
                method.descriptor.render(),
            );
        }
    }
}
