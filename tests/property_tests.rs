mod common;

use common::{broken_descriptor, docker_descriptor, isolated_config, write_module};
use proptest::prelude::*;
use ship_modules::modules::descriptor::{RawCommand, RawDescriptor, RawDocker, RawMetadata, RawSpec};
use ship_modules::modules::{BuiltinTable, Manager, MetadataLoader, ModuleType, SourceKind};
use std::collections::BTreeMap;
use tempfile::TempDir;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn valid_modules_survive_malformed_neighbours(validity in prop::collection::vec(any::<bool>(), 1..8)) {
        let user = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        for (i, valid) in validity.iter().enumerate() {
            let name = format!("mod{i}");
            let descriptor = if *valid {
                docker_descriptor(&name, "1.0.0")
            } else {
                broken_descriptor(&name)
            };
            write_module(project.path(), &name, &descriptor);
        }

        let config = isolated_config(user.path(), project.path());
        let mut manager = Manager::with_builtins(&config, BuiltinTable::empty());
        let report = tokio_test::block_on(manager.load_modules()).unwrap().clone();

        let expected = validity.iter().filter(|v| **v).count();
        prop_assert_eq!(report.loaded, expected);
        prop_assert_eq!(report.validation_errors().count(), validity.len() - expected);
        for (i, valid) in validity.iter().enumerate() {
            let found = manager.get_module(&format!("mod{i}"));
            prop_assert_eq!(found.is_ok(), *valid);
            if let Ok(module) = found {
                prop_assert_eq!(module.module_type(), ModuleType::Docker);
                prop_assert!(module.spec.docker().is_some());
                prop_assert!(module.spec.dagger().is_none());
            }
        }
    }

    #[test]
    fn metadata_reads_back_unchanged(
        name in "[a-z][a-z0-9-]{0,15}",
        version in "[0-9]{1,2}(\\.[0-9]{1,2}){0,2}",
        description in "[A-Za-z0-9 ]{0,30}",
        author in "[A-Za-z ]{0,20}",
        tags in prop::collection::btree_set("[a-z]{1,8}", 0..4),
        labels in prop::collection::btree_map("[a-z]{1,8}", "[A-Za-z0-9]{0,10}", 0..4),
    ) {
        let tags: Vec<String> = tags.into_iter().collect();
        let labels: BTreeMap<String, String> = labels;
        let raw = RawDescriptor {
            api_version: Some("ship.cloudship.ai/v1".to_string()),
            kind: Some("Module".to_string()),
            metadata: Some(RawMetadata {
                name: Some(name.clone()),
                version: Some(version.clone()),
                description: description.clone(),
                author: author.clone(),
                tags: tags.clone(),
                labels: labels.clone(),
            }),
            spec: Some(RawSpec {
                module_type: Some("docker".to_string()),
                docker: Some(RawDocker {
                    image: Some("alpine:3".to_string()),
                    ..Default::default()
                }),
                commands: vec![RawCommand {
                    name: Some("run".to_string()),
                    ..Default::default()
                }],
                ..Default::default()
            }),
        };

        let yaml = raw.to_yaml().unwrap();
        let module = MetadataLoader::new()
            .load_str(&yaml, SourceKind::User, None, "generated")
            .unwrap()
            .module;

        prop_assert_eq!(&module.metadata.name, &name);
        prop_assert_eq!(&module.metadata.version, &version);
        prop_assert_eq!(&module.metadata.description, &description);
        prop_assert_eq!(&module.metadata.author, &author);
        prop_assert_eq!(&module.metadata.tags, &tags);
        prop_assert_eq!(&module.metadata.labels, &labels);
    }
}
