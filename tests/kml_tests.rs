use std::collections::HashMap;

use kml_scene::env::{ArchiveCodec, ArchiveEntry, ParseEnv, StyleFetcher};
use kml_scene::{
    parse_scene, parse_scene_with_env, FieldValue, KmlError, KmlParser, NodeId, NodePayload,
    SceneTree, TriState,
};

fn drain(parser: &mut KmlParser) -> usize {
    let mut emitted = 0;
    while parser.has_next() {
        if parser.parse_next().is_some() {
            emitted += 1;
        }
    }
    emitted
}

fn find_by_label(tree: &SceneTree, label: &str) -> Option<NodeId> {
    let root = tree.root()?;
    tree.descendants(root)
        .into_iter()
        .find(|&id| tree.get(id).map(|n| n.label.as_str()) == Some(label))
}

#[test]
fn test_full_parse_emits_whole_hierarchy() {
    let tree = parse_scene(
        r#"<kml><Document><name>Fleet</name>
             <Folder><name>Ships</name>
               <Placemark><name>Alpha</name>
                 <Point><coordinates>1,2</coordinates></Point>
               </Placemark>
               <Placemark><name>Bravo</name>
                 <Point><coordinates>3,4</coordinates></Point>
               </Placemark>
             </Folder>
           </Document></kml>"#,
    )
    .unwrap();

    // kml, Document, Folder, two placemarks
    assert_eq!(tree.len(), 5);
    let root = tree.root().unwrap();
    assert_eq!(tree.get(root).unwrap().label, "kmlroot");
    assert!(find_by_label(&tree, "Alpha").is_some());
    assert!(find_by_label(&tree, "Bravo").is_some());
}

#[test]
fn test_empty_document_is_fatal() {
    let err = parse_scene("<kml/>").unwrap_err();
    assert!(matches!(err, KmlError::EmptyDocument));
    assert!(err.is_fatal());
}

#[test]
fn test_garbage_input_is_fatal() {
    let err = parse_scene("this is not xml <<<").unwrap_err();
    assert!(matches!(err, KmlError::MalformedDocument(_)));
}

#[test]
fn test_missing_kml_root_is_recovered() {
    let tree = parse_scene(
        "<Document><name>bare</name><Placemark><name>P</name></Placemark></Document>",
    )
    .unwrap();
    let root = tree.root().unwrap();
    // The synthesized wrapper becomes the tree root.
    assert_eq!(tree.get(root).unwrap().label, "kmlroot");
    assert!(find_by_label(&tree, "bare").is_some());
    assert!(find_by_label(&tree, "P").is_some());
}

#[test]
fn test_reparse_produces_same_shape() {
    let xml = r#"<kml><Document><name>D</name>
                   <Placemark><name>P</name>
                     <Point><coordinates>5,6</coordinates></Point>
                   </Placemark>
                 </Document></kml>"#;
    let a = parse_scene(xml).unwrap();
    let b = parse_scene(xml).unwrap();

    assert_eq!(a.len(), b.len());
    let pa = a.get(find_by_label(&a, "P").unwrap()).unwrap().feature().unwrap();
    let pb = b.get(find_by_label(&b, "P").unwrap()).unwrap().feature().unwrap();
    // Feature ids embed the per-parse session token and must differ; all
    // parsed content must agree.
    assert_ne!(pa.id, pb.id);
    assert_eq!(pa.geometry, pb.geometry);
    assert_eq!(pa.properties.get("name"), pb.properties.get("name"));
}

#[test]
fn test_merge_preserves_state_adds_and_removes() {
    let v1 = r#"<kml><Document><name>D</name>
                  <Folder><name>F</name>
                    <Placemark><name>keep</name></Placemark>
                    <Placemark><name>gone</name></Placemark>
                  </Folder>
                </Document></kml>"#;
    let v2 = r#"<kml><Document><name>D</name>
                  <Folder><name>F</name>
                    <Placemark><name>keep</name></Placemark>
                    <Placemark><name>new</name></Placemark>
                  </Folder>
                </Document></kml>"#;

    let mut parser = KmlParser::new();
    parser.set_source(v1).unwrap();
    drain(&mut parser);
    let mut tree = parser.take_tree();

    // Simulate the user collapsing and hiding a node between refreshes.
    let keep = find_by_label(&tree, "keep").unwrap();
    tree.get_mut(keep).unwrap().state = TriState::Off;
    let folder = find_by_label(&tree, "F").unwrap();
    tree.get_mut(folder).unwrap().collapsed = false;

    parser.set_tree(tree);
    parser.set_source(v2).unwrap();
    drain(&mut parser);
    let tree = parser.take_tree();

    // Same identity, preserved UI state.
    assert_eq!(find_by_label(&tree, "keep"), Some(keep));
    assert_eq!(tree.get(keep).unwrap().state, TriState::Off);
    assert!(!tree.get(find_by_label(&tree, "F").unwrap()).unwrap().collapsed);
    // Removed node pruned, new node added.
    assert!(find_by_label(&tree, "gone").is_none());
    assert!(find_by_label(&tree, "new").is_some());
    assert_eq!(tree.len(), 5);
}

#[test]
fn test_merge_updates_payload_in_place() {
    let v1 = r#"<kml><Document><name>D</name>
                  <Placemark><name>P</name>
                    <Point><coordinates>1,1</coordinates></Point>
                  </Placemark>
                </Document></kml>"#;
    let v2 = r#"<kml><Document><name>D</name>
                  <Placemark><name>P</name>
                    <Point><coordinates>9,9</coordinates></Point>
                  </Placemark>
                </Document></kml>"#;

    let mut parser = KmlParser::new();
    parser.set_source(v1).unwrap();
    drain(&mut parser);
    let tree = parser.take_tree();
    let p = find_by_label(&tree, "P").unwrap();

    parser.set_tree(tree);
    parser.set_source(v2).unwrap();
    drain(&mut parser);
    let tree = parser.take_tree();

    let feature = tree.get(p).unwrap().feature().unwrap();
    assert_eq!(
        feature.properties.get("LON"),
        Some(&FieldValue::Number(9.0))
    );
}

#[test]
fn test_merge_with_different_root_replaces_tree() {
    let mut parser = KmlParser::new();
    parser
        .set_source("<kml><Document><name>old</name></Document></kml>")
        .unwrap();
    drain(&mut parser);
    let tree = parser.take_tree();
    let old_doc = find_by_label(&tree, "old").unwrap();

    parser.set_tree(tree);
    parser
        .set_source(r#"<kml id="fresh"><Document><name>new</name></Document></kml>"#)
        .unwrap();
    drain(&mut parser);
    let tree = parser.take_tree();

    assert_eq!(tree.get(tree.root().unwrap()).unwrap().label, "fresh");
    assert!(find_by_label(&tree, "new").is_some());
    // The old tree was released wholesale.
    assert!(tree.get(old_doc).map(|n| n.label.as_str()) != Some("old"));
    assert_eq!(tree.len(), 2);
}

#[test]
fn test_style_precedence_chain() {
    let tree = parse_scene(
        r#"<kml><Document><name>D</name>
             <Style id="shared"><LineStyle><color>ff0000ff</color><width>1</width></LineStyle></Style>
             <Folder><name>F</name>
               <Style><LineStyle><color>ff00ff00</color><width>5</width></LineStyle></Style>
               <Placemark><name>from-ancestor</name></Placemark>
               <Placemark><name>from-url</name><styleUrl>#shared</styleUrl></Placemark>
               <Placemark><name>from-inline</name><styleUrl>#shared</styleUrl>
                 <Style><LineStyle><color>ffff0000</color></LineStyle></Style>
               </Placemark>
             </Folder>
           </Document></kml>"#,
    )
    .unwrap();

    let line_color = |label: &str| {
        let id = find_by_label(&tree, label).unwrap();
        let feature = tree.get(id).unwrap().feature().unwrap();
        let style = feature.style.as_ref().unwrap();
        style.line.as_ref().unwrap().color.clone().unwrap()
    };

    assert_eq!(line_color("from-ancestor"), "ff00ff00");
    assert_eq!(line_color("from-url"), "ff0000ff");
    assert_eq!(line_color("from-inline"), "ffff0000");
}

#[test]
fn test_style_map_highlight_applied_to_feature() {
    let tree = parse_scene(
        r#"<kml><Document><name>D</name>
             <Style id="n"><LineStyle><width>1</width></LineStyle></Style>
             <Style id="h"><LineStyle><width>4</width></LineStyle></Style>
             <StyleMap id="m">
               <Pair><key>normal</key><styleUrl>#n</styleUrl></Pair>
               <Pair><key>highlight</key><styleUrl>#h</styleUrl></Pair>
             </StyleMap>
             <Placemark><name>P</name><styleUrl>#m</styleUrl></Placemark>
           </Document></kml>"#,
    )
    .unwrap();

    let feature = tree
        .get(find_by_label(&tree, "P").unwrap())
        .unwrap()
        .feature()
        .unwrap();
    assert_eq!(
        feature.style.as_ref().unwrap().line.as_ref().unwrap().width,
        Some(1.0)
    );
    assert_eq!(
        feature
            .highlight_style
            .as_ref()
            .unwrap()
            .line
            .as_ref()
            .unwrap()
            .width,
        Some(4.0)
    );
}

#[test]
fn test_default_style_applies_without_declarations() {
    let tree = parse_scene(
        "<kml><Document><name>D</name><Placemark><name>P</name></Placemark></Document></kml>",
    )
    .unwrap();
    let feature = tree
        .get(find_by_label(&tree, "P").unwrap())
        .unwrap()
        .feature()
        .unwrap();
    let style = feature.style.as_ref().unwrap();
    assert_eq!(style.line.as_ref().unwrap().width, Some(2.0));
    assert_eq!(style.poly.as_ref().unwrap().fill, Some(true));
}

#[test]
fn test_schema_extends_feature_vocabulary() {
    let mut parser = KmlParser::new();
    parser
        .set_source(
            r#"<kml><Document><name>D</name>
                 <Schema name="Aircraft" parent="Placemark">
                   <SimpleField name="speed" type="float"/>
                   <SimpleField name="squawk" type="uint"/>
                 </Schema>
                 <Aircraft><name>N1</name>
                   <speed>412.5</speed><squawk>7700</squawk>
                   <Point><coordinates>-77,38</coordinates></Point>
                 </Aircraft>
               </Document></kml>"#,
        )
        .unwrap();
    drain(&mut parser);

    let columns = parser.detected_columns().unwrap();
    assert!(columns.contains(&"speed".to_string()));
    assert!(columns.contains(&"squawk".to_string()));

    let tree = parser.take_tree();
    let feature = tree
        .get(find_by_label(&tree, "N1").unwrap())
        .unwrap()
        .feature()
        .unwrap();
    assert_eq!(
        feature.properties.get("speed"),
        Some(&FieldValue::Number(412.5))
    );
    assert_eq!(
        feature.properties.get("squawk"),
        Some(&FieldValue::UInt(7700))
    );
    assert_eq!(
        feature.properties.get("LAT"),
        Some(&FieldValue::Number(38.0))
    );
}

#[test]
fn test_detected_columns_exclude_internal_fields() {
    let mut parser = KmlParser::new();
    parser
        .set_source(
            r#"<kml><Document><name>D</name>
                 <Placemark><name>P</name><styleUrl>#missing</styleUrl></Placemark>
               </Document></kml>"#,
        )
        .unwrap();
    drain(&mut parser);
    let columns = parser.detected_columns().unwrap();
    assert!(columns.contains(&"name".to_string()));
    assert!(!columns.iter().any(|c| c.eq_ignore_ascii_case("styleurl")));
}

struct StubZip(Vec<ArchiveEntry>);

impl ArchiveCodec for StubZip {
    fn list_entries(&self, _bytes: &[u8]) -> Result<Vec<ArchiveEntry>, String> {
        Ok(self.0.clone())
    }
}

fn kmz_env(entries: Vec<(&str, &[u8])>) -> ParseEnv {
    ParseEnv {
        archive: Box::new(StubZip(
            entries
                .into_iter()
                .map(|(name, data)| ArchiveEntry {
                    name: name.to_string(),
                    data: data.to_vec(),
                })
                .collect(),
        )),
        ..ParseEnv::default()
    }
}

fn kmz_bytes() -> Vec<u8> {
    let mut bytes = vec![0x50, 0x4b, 0x03, 0x04];
    bytes.extend_from_slice(b"stub");
    bytes
}

#[test]
fn test_kmz_overlay_icon_resolves_to_data_uri() {
    let doc = br#"<kml><Document><name>D</name>
                    <GroundOverlay><name>G</name>
                      <Icon><href>files/overlay.png</href></Icon>
                      <LatLonBox><north>2</north><south>1</south><east>2</east><west>1</west></LatLonBox>
                    </GroundOverlay>
                  </Document></kml>"#;
    let env = kmz_env(vec![
        ("doc.kml", doc.as_slice()),
        ("files/overlay.png", &[0xff, 0xd8]),
    ]);

    let tree = parse_scene_with_env(kmz_bytes(), env).unwrap();
    let node = tree.get(find_by_label(&tree, "G").unwrap()).unwrap();
    match &node.payload {
        NodePayload::ImageOverlay(overlay) => {
            assert!(overlay.icon.starts_with("data:image/png;base64,"));
            assert_eq!(overlay.extent, [1.0, 1.0, 2.0, 2.0]);
        }
        other => panic!("expected image overlay, got {:?}", other),
    }
}

#[test]
fn test_kmz_description_asset_rewritten() {
    let doc = br#"<kml><Document><name>D</name>
                    <Placemark><name>P</name>
                      <description><![CDATA[<img src="photo.jpg"/>]]></description>
                    </Placemark>
                  </Document></kml>"#;
    let env = kmz_env(vec![
        ("doc.kml", doc.as_slice()),
        ("photo.jpg", &[1, 2, 3]),
    ]);

    let tree = parse_scene_with_env(kmz_bytes(), env).unwrap();
    let feature = tree
        .get(find_by_label(&tree, "P").unwrap())
        .unwrap()
        .feature()
        .unwrap();
    let description = feature.properties.get("description").unwrap().as_str().unwrap();
    assert!(description.contains("src=\"data:image/jpg;base64,"));
    assert!(!description.contains("src=\"photo.jpg\""));
}

struct StubFetcher(HashMap<String, String>);

impl StyleFetcher for StubFetcher {
    fn get(&self, url: &str) -> Result<String, String> {
        self.0.get(url).cloned().ok_or_else(|| "404".to_string())
    }
}

#[test]
fn test_external_stylesheet_styles_resolve() {
    let mut sheets = HashMap::new();
    sheets.insert(
        "http://styles/base.kml".to_string(),
        r#"<kml><Document><Style id="red"><LineStyle><color>ff0000ff</color></LineStyle></Style></Document></kml>"#
            .to_string(),
    );
    let env = ParseEnv {
        fetcher: Box::new(StubFetcher(sheets)),
        ..ParseEnv::default()
    };

    let tree = parse_scene_with_env(
        r#"<kml><Document><name>D</name>
             <Placemark><name>P</name>
               <styleUrl>http://styles/base.kml#red</styleUrl>
             </Placemark>
           </Document></kml>"#,
        env,
    )
    .unwrap();

    let feature = tree
        .get(find_by_label(&tree, "P").unwrap())
        .unwrap()
        .feature()
        .unwrap();
    assert_eq!(
        feature
            .style
            .as_ref()
            .unwrap()
            .line
            .as_ref()
            .unwrap()
            .color
            .as_deref(),
        Some("ff0000ff")
    );
}

#[test]
fn test_unreachable_stylesheet_does_not_abort() {
    let tree = parse_scene(
        r#"<kml><Document><name>D</name>
             <Placemark><name>P</name>
               <styleUrl>http://unreachable/sheet.kml#x</styleUrl>
             </Placemark>
           </Document></kml>"#,
    )
    .unwrap();
    // The feature still parses with the default style.
    let feature = tree
        .get(find_by_label(&tree, "P").unwrap())
        .unwrap()
        .feature()
        .unwrap();
    assert!(feature.style.is_some());
}
