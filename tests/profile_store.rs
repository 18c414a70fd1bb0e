// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::sync::Arc;

use bytes::Bytes;
use fabric_runtime::{
    profile::{ConfigPaths, Configurations, Properties, ProfileStore, RawConfigurations},
    tree::{CoordinationTree, MemoryTree},
};

const PROFILE: &str = "/config/versions/1.0/profiles/default";

fn store() -> (MemoryTree, ProfileStore) {
    let tree = MemoryTree::new();
    let store = ProfileStore::new(Arc::new(tree.clone()), ConfigPaths::new("/config"));
    (tree, store)
}

fn props(entries: &[(&str, &str)]) -> Properties {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn raw(entries: &[(&str, &str)]) -> RawConfigurations {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), Bytes::from(v.to_string())))
        .collect()
}

#[tokio::test]
async fn test_structured_round_trip() {
    let (_, store) = store();
    let mut configs = Configurations::new();
    configs.insert(
        "org.ops4j.pax.url.mvn".to_string(),
        props(&[
            ("org.ops4j.pax.url.mvn.repositories", "http://repo1.maven.org/maven2"),
            ("greeting", "hello world"),
            ("path", "C:\\fabric\\data"),
            ("unicode", "caf\u{e9}"),
        ]),
    );
    configs.insert("empty".to_string(), Properties::new());

    store
        .set_configurations("1.0", "default", &configs)
        .await
        .unwrap();

    assert_eq!(
        store.get_configurations("1.0", "default").await.unwrap(),
        configs
    );
    assert_eq!(
        store
            .get_configuration("1.0", "default", "org.ops4j.pax.url.mvn")
            .await
            .unwrap()
            .unwrap()["greeting"],
        "hello world"
    );
}

#[tokio::test]
async fn test_legacy_unit_reconstruction() {
    let (tree, store) = store();
    tree.ensure_node(&format!("{PROFILE}/legacy")).await.unwrap();
    tree.set_data(&format!("{PROFILE}/legacy/b"), b"2")
        .await
        .unwrap();
    tree.set_data(&format!("{PROFILE}/legacy/a"), b"1")
        .await
        .unwrap();

    let data = store
        .get_raw_configuration("1.0", "default", "legacy")
        .await
        .unwrap();
    assert_eq!(data, Some(Bytes::from_static(b"a = 1\nb = 2\n")));

    // a unit without payload or children is an empty legacy unit
    tree.ensure_node(&format!("{PROFILE}/bare")).await.unwrap();
    assert_eq!(
        store
            .get_raw_configuration("1.0", "default", "bare")
            .await
            .unwrap(),
        Some(Bytes::new())
    );
}

#[tokio::test]
async fn test_structured_view_of_legacy_unit() {
    let (tree, store) = store();
    tree.set_data(&format!("{PROFILE}/jetty.properties/port"), b"8181")
        .await
        .unwrap();
    tree.set_data(&format!("{PROFILE}/jetty.properties/host"), b"0.0.0.0")
        .await
        .unwrap();

    let jetty = store
        .get_configuration("1.0", "default", "jetty")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(jetty, props(&[("host", "0.0.0.0"), ("port", "8181")]));
}

#[tokio::test]
async fn test_missing_data_reads_as_absent() {
    let (_, store) = store();
    assert_eq!(
        store
            .get_raw_configuration("1.0", "default", "nothing")
            .await
            .unwrap(),
        None
    );
    assert!(store
        .get_all_raw_configurations("1.0", "default")
        .await
        .unwrap()
        .is_empty());
    assert!(store
        .get_configurations("9.9", "missing")
        .await
        .unwrap()
        .is_empty());
    assert_eq!(
        store
            .get_configuration("1.0", "default", "nothing")
            .await
            .unwrap(),
        None
    );
}

#[tokio::test]
async fn test_replace_prunes_missing_units() {
    let (tree, store) = store();
    store
        .set_all_raw_configurations(
            "1.0",
            "default",
            &raw(&[("p1", "k=1"), ("p2", "k=2"), ("p3", "k=3")]),
        )
        .await
        .unwrap();
    tree.set_data(&format!("{PROFILE}/p2/nested"), b"x")
        .await
        .unwrap();

    store
        .set_all_raw_configurations("1.0", "default", &raw(&[("p1", "k=10"), ("p4", "k=4")]))
        .await
        .unwrap();

    let all = store
        .get_all_raw_configurations("1.0", "default")
        .await
        .unwrap();
    assert_eq!(all, raw(&[("p1", "k=10"), ("p4", "k=4")]));
    assert_eq!(tree.get_children(PROFILE).await.unwrap(), vec!["p1", "p4"]);
    assert!(!tree.exists(&format!("{PROFILE}/p2/nested")).await.unwrap());
    assert!(!tree.exists(&format!("{PROFILE}/p3")).await.unwrap());
}

#[tokio::test]
async fn test_legacy_unit_stays_legacy() {
    let (tree, store) = store();
    let unit = format!("{PROFILE}/org.apache.karaf.log");
    tree.set_data(&format!("{unit}/x"), b"1").await.unwrap();
    tree.set_data(&format!("{unit}/y"), b"2").await.unwrap();

    store
        .set_all_raw_configurations(
            "1.0",
            "default",
            &raw(&[(
                "org.apache.karaf.log",
                "# updated\n\nx = 3\nz=4\nnot a pair\n",
            )]),
        )
        .await
        .unwrap();

    assert_eq!(tree.get_data(&unit).await.unwrap(), None);
    assert_eq!(tree.get_children(&unit).await.unwrap(), vec!["x", "z"]);
    assert_eq!(
        tree.get_data(&format!("{unit}/x")).await.unwrap(),
        Some(Bytes::from_static(b"3"))
    );
    assert_eq!(
        store
            .get_raw_configuration("1.0", "default", "org.apache.karaf.log")
            .await
            .unwrap(),
        Some(Bytes::from_static(b"x = 3\nz = 4\n"))
    );
}

#[tokio::test]
async fn test_replace_is_idempotent() {
    let (tree, store) = store();
    let configs = raw(&[("a", "k=1"), ("b.properties", "x=y\n")]);

    store
        .set_all_raw_configurations("1.0", "default", &configs)
        .await
        .unwrap();
    let first = tree.paths();
    let first_all = store
        .get_all_raw_configurations("1.0", "default")
        .await
        .unwrap();

    store
        .set_all_raw_configurations("1.0", "default", &configs)
        .await
        .unwrap();
    assert_eq!(tree.paths(), first);
    assert_eq!(
        store
            .get_all_raw_configurations("1.0", "default")
            .await
            .unwrap(),
        first_all
    );
}

#[tokio::test]
async fn test_structured_replace_leaves_raw_units() {
    let (_, store) = store();
    store
        .set_all_raw_configurations(
            "1.0",
            "default",
            &raw(&[("agent", "blob"), ("old.properties", "a=1")]),
        )
        .await
        .unwrap();

    let mut configs = Configurations::new();
    configs.insert("new".to_string(), props(&[("b", "2")]));
    store
        .set_configurations("1.0", "default", &configs)
        .await
        .unwrap();

    let all = store
        .get_all_raw_configurations("1.0", "default")
        .await
        .unwrap();
    assert_eq!(
        all.keys().map(String::as_str).collect::<Vec<_>>(),
        vec!["agent", "new.properties"]
    );
    assert_eq!(all["agent"], Bytes::from_static(b"blob"));
}

#[tokio::test]
async fn test_attributes_and_listing() {
    let (_, store) = store();
    store.create_version("1.0").await.unwrap();
    store
        .set_version_attribute("1.0", "description", Some("first release"))
        .await
        .unwrap();
    store
        .set_profile_attribute("1.0", "default", "parents", Some("karaf camel"))
        .await
        .unwrap();

    assert_eq!(store.versions().await.unwrap(), vec!["1.0"]);
    assert_eq!(store.profiles("1.0").await.unwrap(), vec!["default"]);
    assert_eq!(
        store.get_version_attributes("1.0").await.unwrap(),
        props(&[("description", "first release")])
    );
    assert_eq!(
        store
            .get_profile_attributes("1.0", "default")
            .await
            .unwrap(),
        props(&[("parents", "karaf camel")])
    );

    store
        .set_profile_attribute("1.0", "default", "parents", None)
        .await
        .unwrap();
    assert!(store
        .get_profile_attributes("1.0", "default")
        .await
        .unwrap()
        .is_empty());
}
