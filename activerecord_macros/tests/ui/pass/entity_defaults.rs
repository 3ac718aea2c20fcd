use activerecord::{EntityDefinition, Format, Native, Record};
use activerecord_macros::Entity;

#[derive(Entity, Clone, Debug, PartialEq)]
struct BlogPost {
    id: i64,
    title: String,
    published: bool,
}

fn main() {
    assert_eq!(BlogPost::TABLE, "blog_posts");
    assert_eq!(BlogPost::NAME, "BlogPost");
    assert_eq!(BlogPost::PRIMARY_KEY, &["id"]);
    assert_eq!(BlogPost::PRIMARY_KEY_SEQUENCE, None);
    assert!(BlogPost::FIELD_MAP.is_empty());
    assert_eq!(BlogPost::FORMAT_MAP, &[("published", Format::Bool)]);
    assert!(!BlogPost::TIMESTAMPS);

    let post = BlogPost { id: 3, title: "Hello".into(), published: true };
    let props = post.to_properties();
    assert_eq!(props.get("title"), Some(&Native::Text("Hello".into())));
    assert_eq!(BlogPost::from_properties(&props).unwrap(), post);
}
