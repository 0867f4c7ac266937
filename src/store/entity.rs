//! Database tables for [`SqlStore`](super::SqlStore).

pub mod player {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "player")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i64,
        #[sea_orm(unique)]
        pub name: String,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {
        #[sea_orm(has_many = "super::bot::Entity")]
        Bot,
    }

    impl Related<super::bot::Entity> for Entity {
        fn to() -> RelationDef {
            Relation::Bot.def()
        }
    }

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod bot {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "bot")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i64,
        pub player_id: i64,
        pub name: String,
        pub filename: String,
        #[sea_orm(column_type = "Text")]
        pub botcode: String,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {
        // Deleting a player removes its bots
        #[sea_orm(
            belongs_to = "super::player::Entity",
            from = "Column::PlayerId",
            to = "super::player::Column::Id",
            on_delete = "Cascade"
        )]
        Player,
    }

    impl Related<super::player::Entity> for Entity {
        fn to() -> RelationDef {
            Relation::Player.def()
        }
    }

    impl ActiveModelBehavior for ActiveModel {}
}
