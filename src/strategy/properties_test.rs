use super::*;

#[test]
fn test_bincode_serializer_preserves_properties() {
    let serializer = BincodePropertiesSerializer;
    let properties = VersionProperties {
        parent_version: Some(4),
        source: Some("job-2031".to_string()),
        extra: [("rows".to_string(), "12".to_string())].into_iter().collect(),
    };

    let bytes = serializer.serialize(&properties).unwrap();

    assert_eq!(serializer.deserialize(&bytes).unwrap(), properties);
}

#[test]
fn test_bincode_serializer_rejects_garbage() {
    let err = BincodePropertiesSerializer.deserialize(&[0xff]).unwrap_err();
    assert!(matches!(
        err,
        crate::Error::System(crate::SystemError::Serialization(_))
    ));
}
