use crate::{
    parse_layer_name, BuildingIndex, CellRegion, CompositeError, CompositeMap, MapData, Road,
    RoomDef, TileLayer, TileRef, Tileset, TilesetError, TilesetResolver, TilesetStore,
    TilesetStoreError,
};
use projection::{MapGeometry, Projector, TilePoint, TileRect};
use std::sync::Arc;

fn tileset(name: &str) -> Tileset {
    // 2x2 tiles of 4x4 pixels each
    let pixels: Arc<[u8]> = vec![0u8; 8 * 8 * 4].into();
    Tileset::new(name, 4, 4, 8, 8, pixels).unwrap()
}

fn root_map(width: u32, height: u32) -> Arc<MapData> {
    let mut data = MapData::new(width, height);
    data.add_tileset(tileset("floors"));
    let mut layer = TileLayer::new("0_Floor", width, height);
    layer.fill_rect(
        TileRect::new(0, 0, width as i32, height as i32),
        TileRef::new(0, 0),
    );
    data.add_layer(layer);
    Arc::new(data)
}

fn lot_map(tileset_name: &str, tile_id: u32, size: u32) -> Arc<MapData> {
    let mut data = MapData::new(size, size);
    data.add_tileset(tileset(tileset_name));
    let mut layer = TileLayer::new("0_Floor", size, size);
    layer.fill_rect(
        TileRect::new(0, 0, size as i32, size as i32),
        TileRef::new(0, tile_id),
    );
    data.add_layer(layer);
    Arc::new(data)
}

fn projector(map: &CompositeMap) -> Projector {
    let geometry = MapGeometry {
        tile_width: 64,
        tile_height: 32,
        map_width: map.root().width(),
        map_height: map.root().height(),
    };
    Projector::new(geometry, map.max_level(), false)
}

#[test]
fn layer_names_split_into_level_and_suffix() {
    assert_eq!(parse_layer_name("1_Walls"), (1, "Walls"));
    assert_eq!(parse_layer_name("07_Roof"), (7, "Roof"));
    assert_eq!(parse_layer_name("Floor"), (0, "Floor"));
    assert_eq!(parse_layer_name("2x_Floor"), (0, "2x_Floor"));
    assert_eq!(parse_layer_name("_Floor"), (0, "_Floor"));
}

#[test]
fn tile_layer_reads_clip_to_bounds() {
    let mut layer = TileLayer::new("0_Floor", 4, 4);
    layer.fill_rect(TileRect::new(-2, -2, 4, 4), TileRef::new(0, 1));
    assert_eq!(layer.cell(0, 0), Some(TileRef::new(0, 1)));
    assert_eq!(layer.cell(1, 1), Some(TileRef::new(0, 1)));
    assert_eq!(layer.cell(2, 2), None);
    assert_eq!(layer.cell(-1, 0), None);
    assert_eq!(layer.cell(4, 0), None);
}

#[test]
fn tileset_validates_pixel_buffer() {
    let pixels: Arc<[u8]> = vec![0u8; 16].into();
    let result = Tileset::new("bad", 4, 4, 8, 8, pixels);
    assert_eq!(
        result.err(),
        Some(TilesetError::PixelSizeMismatch {
            expected: 8 * 8 * 4,
            actual: 16,
        })
    );
    let none: Arc<[u8]> = Vec::new().into();
    assert_eq!(
        Tileset::new("bad", 0, 4, 8, 8, none).err(),
        Some(TilesetError::ZeroTileSize)
    );
}

#[test]
fn uv_rects_walk_the_image_row_major() {
    let set = tileset("floors");
    assert_eq!(set.tile_count(), 4);
    let first = set.uv_rect(0).unwrap();
    assert_eq!((first.u0, first.v0, first.u1, first.v1), (0.0, 0.0, 0.5, 0.5));
    let last = set.uv_rect(3).unwrap();
    assert_eq!((last.u0, last.v0, last.u1, last.v1), (0.5, 0.5, 1.0, 1.0));
    assert!(set.uv_rect(4).is_none());
}

#[test]
fn store_replacement_advances_the_change_count() {
    let mut store = TilesetStore::new();
    store.insert(tileset("floors"));
    assert_eq!(store.resolve_tileset("floors").unwrap().change_count(), 0);

    store.insert(tileset("floors"));
    assert_eq!(store.resolve_tileset("floors").unwrap().change_count(), 1);

    let pixels: Arc<[u8]> = vec![255u8; 8 * 8 * 4].into();
    store.replace_pixels("floors", pixels).unwrap();
    assert_eq!(store.resolve_tileset("floors").unwrap().change_count(), 2);

    let pixels: Arc<[u8]> = vec![0u8; 4].into();
    assert_eq!(
        store.replace_pixels("floors", pixels),
        Err(TilesetStoreError::PixelSizeMismatch {
            expected: 8 * 8 * 4,
            actual: 4,
        })
    );
    assert_eq!(
        store.replace_pixels("missing", vec![0u8; 4].into()),
        Err(TilesetStoreError::UnknownTileset)
    );
}

#[test]
fn change_counter_advances_on_structural_mutations() {
    let mut map = CompositeMap::new(root_map(20, 20));
    let mut last = map.change_count();
    let mut expect_bump = |map: &CompositeMap| {
        assert!(map.change_count() > last, "mutation did not advance counter");
        last = map.change_count();
    };

    let a = map.add_sub_map(lot_map("lot", 1, 4), TilePoint::new(2, 2), 0);
    expect_bump(&map);
    map.move_sub_map(a, TilePoint::new(3, 3)).unwrap();
    expect_bump(&map);
    map.set_sub_map_level(a, 1).unwrap();
    expect_bump(&map);
    map.replace_sub_map_data(a, lot_map("lot", 2, 4)).unwrap();
    expect_bump(&map);
    map.ensure_level_count(3);
    expect_bump(&map);
    map.generate_road_layers(
        TilePoint::new(0, 0),
        &[Road {
            start: TilePoint::new(0, 10),
            end: TilePoint::new(19, 10),
            width: 2,
            tile: TileRef::new(0, 3),
        }],
    );
    expect_bump(&map);
    map.sort_sub_maps(&[a]);
    expect_bump(&map);
    map.remove_sub_map(a).unwrap();
    expect_bump(&map);
}

#[test]
fn draw_state_changes_leave_the_change_counter_alone() {
    let mut map = CompositeMap::new(root_map(20, 20));
    let a = map.add_sub_map(lot_map("lot", 1, 4), TilePoint::new(2, 2), 0);
    map.synch();
    let before = map.change_count();

    map.set_sub_map_visible(a, false).unwrap();
    map.set_sub_map_hidden_during_drag(a, true).unwrap();
    map.set_level_visible(0, false);
    map.set_layer_visible(0, "Floor", false);
    map.set_layer_opacity(0, "Floor", 0.5);
    let mut region = CellRegion::new();
    region.insert(TilePoint::new(2, 2));
    map.set_suppression(region, 0);
    map.clear_suppression();

    assert_eq!(map.change_count(), before);
}

#[test]
fn ordered_cells_stack_root_then_sub_maps_in_order() {
    let mut map = CompositeMap::new(root_map(20, 20));
    let a = map.add_sub_map(lot_map("lot_a", 1, 4), TilePoint::new(5, 5), 0);
    let b = map.add_sub_map(lot_map("lot_b", 2, 4), TilePoint::new(5, 5), 0);
    map.synch();

    let entries: Vec<_> = map.ordered_cells_at(TilePoint::new(5, 5), 0).collect();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0].tile_id, 0);
    assert_eq!(entries[0].sub_map, None);
    assert_eq!(entries[1].tile_id, 1);
    assert_eq!(entries[1].sub_map, Some(a));
    assert_eq!(entries[2].tile_id, 2);
    assert_eq!(entries[2].sub_map, Some(b));
    // every entry resolves to the level's "Floor" slot
    assert!(entries.iter().all(|e| e.layer_index == 0));

    // outside both lots only the root contributes
    let entries: Vec<_> = map.ordered_cells_at(TilePoint::new(0, 0), 0).collect();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].sub_map, None);
}

#[test]
fn sort_sub_maps_reverses_the_stack() {
    let mut map = CompositeMap::new(root_map(20, 20));
    let a = map.add_sub_map(lot_map("lot_a", 1, 4), TilePoint::new(5, 5), 0);
    let b = map.add_sub_map(lot_map("lot_b", 2, 4), TilePoint::new(5, 5), 0);
    map.synch();

    map.sort_sub_maps(&[b, a]);
    let entries: Vec<_> = map.ordered_cells_at(TilePoint::new(5, 5), 0).collect();
    assert_eq!(entries[1].sub_map, Some(b));
    assert_eq!(entries[2].sub_map, Some(a));
}

#[test]
fn ordered_cells_carry_hidden_root_layers_through() {
    let mut map = CompositeMap::new(root_map(20, 20));
    let a = map.add_sub_map(lot_map("lot_a", 1, 4), TilePoint::new(5, 5), 0);
    map.synch();

    // hiding a layer is draw state: the stack still yields its entries,
    // each carrying the slot index for the draw-time visibility check
    assert!(map.set_layer_visible(0, "Floor", false));
    let entries: Vec<_> = map.ordered_cells_at(TilePoint::new(5, 5), 0).collect();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].sub_map, None);
    assert_eq!(entries[0].layer_index, 0);
    assert_eq!(entries[1].sub_map, Some(a));
    assert!(!map.group(0).unwrap().is_layer_visible(0));

    assert!(!map.set_layer_visible(0, "NoSuchLayer", false));
}

#[test]
fn unmatched_lot_suffixes_fall_outside_the_layer_table() {
    let mut lot = MapData::new(4, 4);
    lot.add_tileset(tileset("lot"));
    let mut deco = TileLayer::new("0_Deco", 4, 4);
    deco.fill_rect(TileRect::new(0, 0, 4, 4), TileRef::new(0, 1));
    lot.add_layer(deco);

    let mut map = CompositeMap::new(root_map(20, 20));
    let id = map.add_sub_map(Arc::new(lot), TilePoint::new(5, 5), 0);
    map.synch();

    let entries: Vec<_> = map.ordered_cells_at(TilePoint::new(6, 6), 0).collect();
    let slot = entries
        .iter()
        .find(|e| e.sub_map == Some(id))
        .expect("lot entry")
        .layer_index;
    assert!(slot >= map.group(0).unwrap().layer_count());

    // hiding or dimming the root's first layer leaves the lot alone:
    // out-of-table slots stay visible at full opacity
    assert!(map.set_layer_visible(0, "Floor", false));
    assert!(map.set_layer_opacity(0, "Floor", 0.25));
    let group = map.group(0).unwrap();
    assert!(group.is_layer_visible(slot));
    assert_eq!(group.layer_opacity(slot), 1.0);
}

#[test]
fn sub_map_levels_offset_their_layers() {
    let mut lot = MapData::new(4, 4);
    lot.add_tileset(tileset("lot"));
    let mut floor = TileLayer::new("0_Floor", 4, 4);
    floor.fill_rect(TileRect::new(0, 0, 4, 4), TileRef::new(0, 1));
    lot.add_layer(floor);
    let mut walls = TileLayer::new("1_Walls", 4, 4);
    walls.fill_rect(TileRect::new(0, 0, 4, 4), TileRef::new(0, 2));
    lot.add_layer(walls);

    let mut map = CompositeMap::new(root_map(20, 20));
    let id = map.add_sub_map(Arc::new(lot), TilePoint::new(5, 5), 1);
    map.synch();
    assert_eq!(map.max_level(), 2);

    let square = TilePoint::new(6, 6);
    let level0: Vec<_> = map.ordered_cells_at(square, 0).collect();
    assert_eq!(level0.len(), 1);
    assert_eq!(level0[0].sub_map, None);

    let level1: Vec<_> = map.ordered_cells_at(square, 1).collect();
    assert_eq!(level1.len(), 1);
    assert_eq!(level1[0].sub_map, Some(id));
    assert_eq!(level1[0].tile_id, 1);

    let level2: Vec<_> = map.ordered_cells_at(square, 2).collect();
    assert_eq!(level2.len(), 1);
    assert_eq!(level2[0].tile_id, 2);
}

#[test]
fn road_layer_slots_between_root_and_sub_maps() {
    let mut map = CompositeMap::new(root_map(20, 20));
    let id = map.add_sub_map(lot_map("lot", 2, 4), TilePoint::new(9, 9), 0);
    map.synch();
    map.generate_road_layers(
        TilePoint::new(0, 0),
        &[Road {
            start: TilePoint::new(0, 10),
            end: TilePoint::new(19, 10),
            width: 2,
            tile: TileRef::new(0, 3),
        }],
    );

    let entries: Vec<_> = map.ordered_cells_at(TilePoint::new(10, 10), 0).collect();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0].sub_map, None);
    assert_eq!(entries[1].tile_id, 3);
    assert_eq!(entries[1].sub_map, None);
    assert_eq!(entries[2].sub_map, Some(id));

    // outside the carriageway no road entry appears
    let entries: Vec<_> = map.ordered_cells_at(TilePoint::new(10, 14), 0).collect();
    assert_eq!(entries.len(), 1);

    map.generate_road_layers(TilePoint::new(0, 0), &[]);
    assert!(map.road_layer().is_none());
    let entries: Vec<_> = map.ordered_cells_at(TilePoint::new(10, 10), 0).collect();
    assert_eq!(entries.len(), 2);
}

#[test]
fn road_layer_respects_the_world_origin() {
    let mut map = CompositeMap::new(root_map(20, 20));
    map.generate_road_layers(
        TilePoint::new(300, 300),
        &[Road {
            start: TilePoint::new(300, 305),
            end: TilePoint::new(310, 305),
            width: 1,
            tile: TileRef::new(0, 3),
        }],
    );
    let road = map.road_layer().unwrap();
    assert_eq!(road.cell(5, 5), Some(TileRef::new(0, 3)));
    assert_eq!(road.cell(5, 7), None);
}

#[test]
fn synch_preserves_layer_visibility_and_opacity() {
    let mut root = MapData::new(8, 8);
    root.add_tileset(tileset("floors"));
    root.add_layer(TileLayer::new("0_Floor", 8, 8));
    root.add_layer(TileLayer::new("0_Walls", 8, 8));
    let mut map = CompositeMap::new(Arc::new(root));

    assert!(map.set_layer_visible(0, "Walls", false));
    assert!(map.set_layer_opacity(0, "Floor", 0.25));
    map.set_level_visible(0, false);

    map.add_sub_map(lot_map("lot", 1, 4), TilePoint::new(0, 0), 0);
    map.synch();

    let group = map.group(0).unwrap();
    let walls = group.index_of("Walls").unwrap();
    let floor = group.index_of("Floor").unwrap();
    assert!(!group.is_layer_visible(walls));
    assert_eq!(group.layer_opacity(floor), 0.25);
    assert!(!group.is_visible());
}

#[test]
fn ensure_level_count_grows_the_level_span() {
    let mut map = CompositeMap::new(root_map(8, 8));
    assert_eq!(map.max_level(), 0);

    map.ensure_level_count(2);
    assert!(map.needs_synch());
    map.synch();
    assert_eq!(map.max_level(), 2);
    assert!(map.group(2).is_some());
    assert_eq!(map.group(1).unwrap().layer_count(), 0);
    assert!(map.is_level_visible(2));

    // the span never shrinks back
    map.ensure_level_count(1);
    map.synch();
    assert_eq!(map.max_level(), 2);
}

#[test]
fn placeholder_sub_maps_have_footprint_but_no_cells() {
    let mut map = CompositeMap::new(root_map(20, 20));
    let id = map.add_sub_map(Arc::new(MapData::placeholder(6, 6)), TilePoint::new(18, 18), 0);
    map.synch();

    let sub = map.sub_map(id).unwrap();
    assert!(sub.data().is_placeholder());
    assert_eq!(sub.bounds(), TileRect::new(18, 18, 6, 6));

    let entries: Vec<_> = map.ordered_cells_at(TilePoint::new(19, 19), 0).collect();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].sub_map, None);

    // the placeholder footprint still widens the bounding rect
    let projector = projector(&map);
    let with_lot = map.bounding_rect(&projector, TilePoint::new(0, 0));
    let root_only =
        projector.bounding_rect(TileRect::new(0, 0, 20, 20), 0);
    assert!(with_lot.width > root_only.width);
    assert!(with_lot.height > root_only.height);
}

#[test]
fn remove_sub_map_clears_hide_if_visible_links() {
    let mut map = CompositeMap::new(root_map(20, 20));
    let full = map.add_sub_map(lot_map("lot", 1, 4), TilePoint::new(5, 5), 0);
    let footprint = map.add_sub_map(lot_map("lot", 2, 4), TilePoint::new(5, 5), 0);
    map.set_sub_map_hide_if_visible(footprint, Some(full)).unwrap();
    assert_eq!(map.sub_map(footprint).unwrap().hide_if_visible(), Some(full));

    map.remove_sub_map(full).unwrap();
    assert_eq!(map.sub_map(footprint).unwrap().hide_if_visible(), None);

    // handles go stale on removal
    assert_eq!(
        map.remove_sub_map(full).err(),
        Some(CompositeError::UnknownSubMap)
    );
    assert_eq!(
        map.move_sub_map(full, TilePoint::new(0, 0)),
        Err(CompositeError::UnknownSubMap)
    );
}

#[test]
fn sort_by_lot_index_restores_insertion_order() {
    let mut map = CompositeMap::new(root_map(20, 20));
    let a = map.add_sub_map(lot_map("a", 1, 4), TilePoint::new(0, 0), 0);
    let b = map.add_sub_map(lot_map("b", 2, 4), TilePoint::new(4, 4), 0);
    let c = map.add_sub_map(lot_map("c", 3, 4), TilePoint::new(8, 8), 0);

    map.sort_sub_maps(&[c, a, b]);
    assert_eq!(map.sub_map_order(), &[c, a, b]);

    map.sort_sub_maps_by_lot_index();
    assert_eq!(map.sub_map_order(), &[a, b, c]);
}

#[test]
fn sync_lot_visibility_tracks_level_visibility() {
    let mut map = CompositeMap::new(root_map(20, 20));
    map.ensure_level_count(1);
    let id = map.add_sub_map(lot_map("lot", 1, 4), TilePoint::new(5, 5), 1);
    map.synch();

    map.set_level_visible(1, false);
    assert!(map.sync_lot_visibility());
    assert!(!map.sub_map(id).unwrap().is_lot_visible());
    assert!(!map.sync_lot_visibility());

    map.set_level_visible(1, true);
    assert!(map.sync_lot_visibility());
    assert!(map.sub_map(id).unwrap().is_lot_visible());
}

#[test]
fn bounding_rect_unions_every_level() {
    let mut root = MapData::new(20, 20);
    root.add_tileset(tileset("floors"));
    root.add_layer(TileLayer::new("0_Floor", 20, 20));
    root.add_layer(TileLayer::new("1_Walls", 20, 20));
    let map = CompositeMap::new(Arc::new(root));
    assert_eq!(map.max_level(), 1);
    let projector = projector(&map);

    let union = map.bounding_rect(&projector, TilePoint::new(0, 0));
    let level0 = projector.bounding_rect(TileRect::new(0, 0, 20, 20), 0);
    let level1 = projector.bounding_rect(TileRect::new(0, 0, 20, 20), 1);
    // level 0 sits a level step below level 1, the union spans both
    assert_eq!(union.bottom(), level0.bottom());
    assert_eq!(union.y, level1.y);
    assert!(union.y < level0.y);
}

#[test]
fn building_index_finds_topmost_room() {
    let mut root = MapData::new(20, 20);
    root.add_tileset(tileset("floors"));
    root.add_layer(TileLayer::new("0_Floor", 20, 20));
    root.add_room(RoomDef {
        name: "kitchen".to_string(),
        level: 0,
        rects: vec![TileRect::new(2, 2, 3, 3)],
    });
    root.add_room(RoomDef {
        name: "hall".to_string(),
        level: 0,
        rects: vec![TileRect::new(5, 2, 2, 3)],
    });

    let mut lot = MapData::new(4, 4);
    lot.add_tileset(tileset("lot"));
    lot.add_room(RoomDef {
        name: "loft".to_string(),
        level: 0,
        rects: vec![TileRect::new(0, 0, 2, 2)],
    });

    let mut map = CompositeMap::new(Arc::new(root));
    map.add_sub_map(Arc::new(lot), TilePoint::new(2, 2), 0);
    map.synch();

    let mut index = BuildingIndex::new();
    assert!(index.is_dirty());
    index.ensure(&map);
    assert!(!index.is_dirty());
    assert_eq!(index.room_count(), 3);

    // the lot's room sits on top of the kitchen where they overlap
    assert_eq!(index.room_name_at(TilePoint::new(3, 3), 0), Some("loft"));
    assert_eq!(index.room_name_at(TilePoint::new(4, 4), 0), Some("kitchen"));
    assert_eq!(index.room_name_at(TilePoint::new(5, 2), 0), Some("hall"));
    assert_eq!(index.room_name_at(TilePoint::new(10, 10), 0), None);
    assert_eq!(index.room_name_at(TilePoint::new(3, 3), 1), None);
}

#[test]
fn suppression_region_is_building_minus_hovered_room() {
    let mut root = MapData::new(20, 20);
    root.add_tileset(tileset("floors"));
    root.add_room(RoomDef {
        name: "kitchen".to_string(),
        level: 0,
        rects: vec![TileRect::new(2, 2, 3, 3)],
    });
    root.add_room(RoomDef {
        name: "hall".to_string(),
        level: 0,
        rects: vec![TileRect::new(5, 2, 2, 3)],
    });
    root.add_room(RoomDef {
        name: "attic".to_string(),
        level: 1,
        rects: vec![TileRect::new(2, 2, 5, 3)],
    });

    let map = CompositeMap::new(Arc::new(root));
    let mut index = BuildingIndex::new();
    index.ensure(&map);

    let kitchen = index.room_at(TilePoint::new(2, 2), 0).unwrap();
    let region = index.suppression_region(kitchen);
    // the hall's six squares, nothing of the kitchen, nothing of the attic
    assert_eq!(region.len(), 6);
    assert!(region.contains(TilePoint::new(5, 2)));
    assert!(region.contains(TilePoint::new(6, 4)));
    assert!(!region.contains(TilePoint::new(2, 2)));
    assert_eq!(index.room_level(kitchen), Some(0));
}

#[test]
fn is_tileset_used_checks_root_and_sub_maps() {
    let mut map = CompositeMap::new(root_map(20, 20));
    assert!(map.is_tileset_used("floors"));
    assert!(!map.is_tileset_used("lot_art"));

    let id = map.add_sub_map(lot_map("lot_art", 1, 4), TilePoint::new(5, 5), 0);
    assert!(map.is_tileset_used("lot_art"));

    map.remove_sub_map(id).unwrap();
    assert!(!map.is_tileset_used("lot_art"));
}

#[test]
fn max_tile_size_spans_all_contributors() {
    let mut root = MapData::new(8, 8);
    root.add_tileset(tileset("floors"));
    let mut map = CompositeMap::new(Arc::new(root));
    assert_eq!(map.max_tile_size(), (4, 4));

    let mut lot = MapData::new(4, 4);
    let pixels: Arc<[u8]> = vec![0u8; 16 * 32 * 4].into();
    lot.add_tileset(Tileset::new("tall", 16, 32, 16, 32, pixels).unwrap());
    map.add_sub_map(Arc::new(lot), TilePoint::new(0, 0), 0);
    assert_eq!(map.max_tile_size(), (16, 32));
}

#[test]
fn cell_region_set_operations() {
    let mut region = CellRegion::from_rects(&[
        TileRect::new(0, 0, 2, 2),
        TileRect::new(1, 1, 2, 2),
    ]);
    assert_eq!(region.len(), 7);
    assert!(region.contains(TilePoint::new(2, 2)));
    assert_eq!(region.bounding_rect(), TileRect::new(0, 0, 3, 3));

    let mut other = CellRegion::new();
    other.insert_rect(TileRect::new(1, 1, 2, 2));
    region.subtract(&other);
    assert_eq!(region.len(), 3);
    assert!(!region.contains(TilePoint::new(1, 1)));

    let moved = region.translated(TilePoint::new(10, 0));
    assert!(moved.contains(TilePoint::new(10, 0)));
    assert!(!moved.contains(TilePoint::new(0, 0)));

    region.union_with(&other);
    assert_eq!(region.len(), 7);
}
